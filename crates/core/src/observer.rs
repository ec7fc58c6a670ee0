/// A hook into a driver's progress.
///
/// Drivers report each completed evaluation pass and each penalty update as
/// an event `E`. The history and log writers are observers that turn those
/// events into files. An observer can also answer with an action `A`, such as
/// asking a penalty driver to update its coefficients early. Most events get
/// `None` back.
///
/// Any `FnMut(&E) -> Option<A>` closure is an observer. So is `()`, which
/// ignores everything.
pub trait Observer<E, A> {
    /// Handles one event. The driver acts on the returned action, if any.
    fn observe(&mut self, event: &E) -> Option<A>;
}

impl<E, A, F> Observer<E, A> for F
where
    F: FnMut(&E) -> Option<A>,
{
    fn observe(&mut self, event: &E) -> Option<A> {
        self(event)
    }
}

impl<E, A> Observer<E, A> for () {
    fn observe(&mut self, _event: &E) -> Option<A> {
        None
    }
}
