use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use thiserror::Error;

/// Named series carried by every [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Series {
    Initial,
    LowerBound,
    UpperBound,
}

/// Errors that can occur when building or updating a [`Variable`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariableError {
    #[error("variable `{name}` must have at least one entry")]
    Empty { name: String },

    #[error("scale of variable `{name}` must be finite and positive, got {scale}")]
    NonPositiveScale { name: String, scale: f64 },

    #[error("variable `{name}` expects {expected} values, got {found}")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("bounds of variable `{name}` are inverted at index {index}")]
    InvalidBounds { name: String, index: usize },
}

/// A scalar or vector slice of the design vector.
///
/// The optimizer sees `current · scale`; the variable itself always stores
/// unscaled values. Bounds default to `±∞`.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    scale: f64,
    initial: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    current: Vec<f64>,
}

impl Variable {
    /// Creates an unbounded variable with unit scale.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial` is empty.
    pub fn new(name: impl Into<String>, initial: impl Into<Vec<f64>>) -> Result<Self, VariableError> {
        let name = name.into();
        let initial = initial.into();
        if initial.is_empty() {
            return Err(VariableError::Empty { name });
        }

        let size = initial.len();
        Ok(Self {
            name,
            scale: 1.0,
            lower: vec![f64::NEG_INFINITY; size],
            upper: vec![f64::INFINITY; size],
            current: initial.clone(),
            initial,
        })
    }

    /// Sets the scale applied to this variable in the design vector.
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and strictly positive.
    pub fn with_scale(mut self, scale: f64) -> Result<Self, VariableError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(VariableError::NonPositiveScale {
                name: self.name,
                scale,
            });
        }
        self.scale = scale;
        Ok(self)
    }

    /// Sets lower and upper bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if either series has the wrong length or if a lower
    /// bound exceeds its upper bound.
    pub fn with_bounds(
        mut self,
        lower: impl Into<Vec<f64>>,
        upper: impl Into<Vec<f64>>,
    ) -> Result<Self, VariableError> {
        let lower = lower.into();
        let upper = upper.into();
        self.check_size(lower.len())?;
        self.check_size(upper.len())?;

        if let Some(index) = lower
            .iter()
            .zip(&upper)
            .position(|(lo, up)| lo.is_nan() || up.is_nan() || lo > up)
        {
            return Err(VariableError::InvalidBounds {
                name: self.name,
                index,
            });
        }

        self.lower = lower;
        self.upper = upper;
        Ok(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.initial.len()
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Returns one of the named series, unscaled.
    #[must_use]
    pub fn series(&self, series: Series) -> &[f64] {
        match series {
            Series::Initial => &self.initial,
            Series::LowerBound => &self.lower,
            Series::UpperBound => &self.upper,
        }
    }

    /// Returns the current (unscaled) value.
    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Overwrites the current value with unscaled `values`.
    ///
    /// # Errors
    ///
    /// Returns an error if `values` does not have [`Variable::size`] entries.
    pub fn set_current(&mut self, values: &[f64]) -> Result<(), VariableError> {
        self.check_size(values.len())?;
        self.current.copy_from_slice(values);
        Ok(())
    }

    fn check_size(&self, found: usize) -> Result<(), VariableError> {
        if found == self.size() {
            Ok(())
        } else {
            Err(VariableError::SizeMismatch {
                name: self.name.clone(),
                expected: self.size(),
                found,
            })
        }
    }
}

/// Shared handle to a [`Variable`].
///
/// Functions and evaluation steps hold clones of the same handle, so a new
/// design point pushed by the driver is seen by all of them. Equality and
/// hashing use the identity of the handle, not the variable's contents.
#[derive(Clone)]
pub struct VariableRef(Rc<RefCell<Variable>>);

impl VariableRef {
    #[must_use]
    pub fn new(variable: Variable) -> Self {
        Self(Rc::new(RefCell::new(variable)))
    }

    /// Immutably borrows the variable.
    ///
    /// # Panics
    ///
    /// Panics if the variable is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, Variable> {
        self.0.borrow()
    }

    /// Mutably borrows the variable.
    ///
    /// # Panics
    ///
    /// Panics if the variable is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, Variable> {
        self.0.borrow_mut()
    }

    /// Identity key of the shared variable.
    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl From<Variable> for VariableRef {
    fn from(variable: Variable) -> Self {
        Self::new(variable)
    }
}

impl PartialEq for VariableRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for VariableRef {}

impl Hash for VariableRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VariableRef").field(&self.borrow().name()).finish()
    }
}
