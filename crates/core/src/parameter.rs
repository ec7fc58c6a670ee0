use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parameter `{name}` needs at least one value")]
pub struct ParameterError {
    pub name: String,
}

/// Optimizer-invisible state advanced between outer iterations.
///
/// A parameter walks through a fixed schedule of values (e.g. a continuation
/// or homotopy parameter). [`Parameter::increment`] moves to the next value
/// and saturates at the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    values: Vec<f64>,
    cursor: usize,
}

impl Parameter {
    /// Creates a parameter that starts at the first of `values`.
    ///
    /// # Errors
    ///
    /// Returns an error if `values` is empty.
    pub fn new(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Result<Self, ParameterError> {
        let name = name.into();
        let values = values.into();
        if values.is_empty() {
            return Err(ParameterError { name });
        }
        Ok(Self {
            name,
            values,
            cursor: 0,
        })
    }

    /// Creates a parameter that never changes.
    #[must_use]
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            values: vec![value],
            cursor: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.values[self.cursor]
    }

    /// Position in the schedule, starting at zero.
    #[must_use]
    pub fn index(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.cursor + 1 == self.values.len()
    }

    /// Advances to the next value; returns `false` once the schedule is exhausted.
    pub fn increment(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Returns to the first value.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Shared handle to a [`Parameter`], compared by identity.
#[derive(Clone)]
pub struct ParameterRef(Rc<RefCell<Parameter>>);

impl ParameterRef {
    #[must_use]
    pub fn new(parameter: Parameter) -> Self {
        Self(Rc::new(RefCell::new(parameter)))
    }

    /// # Panics
    ///
    /// Panics if the parameter is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, Parameter> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the parameter is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, Parameter> {
        self.0.borrow_mut()
    }

    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl From<Parameter> for ParameterRef {
    fn from(parameter: Parameter) -> Self {
        Self::new(parameter)
    }
}

impl PartialEq for ParameterRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ParameterRef {}

impl Hash for ParameterRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParameterRef")
            .field(&self.borrow().name())
            .finish()
    }
}
