//! Functions of the design variables and the shared handle drivers hold.

mod chain;

pub use chain::ChainFunction;

use std::{
    cell::{Ref, RefCell, RefMut},
    error::Error as StdError,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use thiserror::Error;

use crate::{ParameterRef, ReadError, StepError, StepRef, VariableMask, VariableRef};

/// Errors that can occur while evaluating a function or its gradient.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("step `{step}` failed")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("variable `{0}` is not part of the design vector")]
    UnknownVariable(String),

    #[error("expected {expected} values, got {found}")]
    Size { expected: usize, found: usize },

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl FunctionError {
    pub fn other<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

/// A scalar function of the design variables.
///
/// A function names the steps it needs for its value and for its gradient as
/// two ordered chains; step `i` of a chain depends on step `i - 1`. Drivers
/// may run those steps ahead of time (and share them between functions), so
/// [`Function::value`] and [`Function::gradient`] must only run the steps
/// that have not finished yet.
pub trait Function {
    fn name(&self) -> &str;

    /// Variables the function depends on, in a stable order.
    fn variables(&self) -> Vec<VariableRef>;

    fn parameters(&self) -> Vec<ParameterRef> {
        Vec::new()
    }

    fn value_chain(&self) -> Vec<StepRef>;

    fn gradient_chain(&self) -> Vec<StepRef>;

    /// Evaluates the function at the current variable values.
    ///
    /// # Errors
    ///
    /// Returns an error if a step of the value chain fails or the value
    /// cannot be read.
    fn value(&mut self) -> Result<f64, FunctionError>;

    /// Evaluates the gradient, laid out as described by `mask`.
    ///
    /// The returned vector has `mask.len()` entries; entries of variables the
    /// function does not depend on are zero.
    ///
    /// # Errors
    ///
    /// Returns an error if a step of the gradient chain fails, the gradient
    /// cannot be read, or a variable is missing from `mask`.
    fn gradient(&mut self, mask: &VariableMask) -> Result<Vec<f64>, FunctionError>;

    /// Value to use instead of a failed evaluation, if any.
    fn default_value(&self) -> Option<f64> {
        None
    }

    fn has_default_value(&self) -> bool {
        self.default_value().is_some()
    }

    fn reset_value_chain(&mut self) {
        for step in self.value_chain() {
            step.borrow_mut().reset();
        }
    }

    fn reset_gradient_chain(&mut self) {
        for step in self.gradient_chain() {
            step.borrow_mut().reset();
        }
    }
}

/// Shared handle to a [`Function`], compared by identity.
#[derive(Clone)]
pub struct FunctionRef(Rc<RefCell<dyn Function>>);

impl FunctionRef {
    pub fn new<F: Function + 'static>(function: F) -> Self {
        Self(Rc::new(RefCell::new(function)))
    }

    /// # Panics
    ///
    /// Panics if the function is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, dyn Function + 'static> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the function is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, dyn Function + 'static> {
        self.0.borrow_mut()
    }

    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.borrow().name().to_owned()
    }
}

impl<F: Function + 'static> From<Rc<RefCell<F>>> for FunctionRef {
    fn from(function: Rc<RefCell<F>>) -> Self {
        Self(function)
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FunctionRef {}

impl Hash for FunctionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FunctionRef").field(&self.borrow().name()).finish()
    }
}
