use fado_core::Observer;

/// Sends every event to two observers.
///
/// Both observers always see the event. If both request an action, the first
/// observer's action wins.
///
/// ```
/// use fado_core::Observer;
/// use fado_observers::Tee;
///
/// let mut seen = Vec::new();
/// let mut tee = Tee(|e: &u32| (*e > 1).then_some("big"), |e: &u32| -> Option<&str> {
///     seen.push(*e);
///     None
/// });
///
/// assert_eq!(tee.observe(&3), Some("big"));
/// assert_eq!(tee.observe(&1), None);
/// drop(tee);
/// assert_eq!(seen, [3, 1]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Tee<A, B>(pub A, pub B);

impl<E, Act, A, B> Observer<E, Act> for Tee<A, B>
where
    A: Observer<E, Act>,
    B: Observer<E, Act>,
{
    fn observe(&mut self, event: &E) -> Option<Act> {
        let first = self.0.observe(event);
        let second = self.1.observe(event);
        first.or(second)
    }
}
