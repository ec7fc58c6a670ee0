use std::collections::HashMap;

use crate::VariableRef;

/// Maps each variable to its offset in the flat design vector.
///
/// Offsets are assigned in insertion order, so inserting variables in a
/// canonical order gives a stable layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMask {
    offsets: HashMap<usize, usize>,
    len: usize,
}

impl VariableMask {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `variable` to the layout.
    ///
    /// Returns `false` and leaves the mask unchanged if the variable is
    /// already present.
    pub fn insert(&mut self, variable: &VariableRef) -> bool {
        if self.offsets.contains_key(&variable.key()) {
            return false;
        }
        self.offsets.insert(variable.key(), self.len);
        self.len += variable.borrow().size();
        true
    }

    /// Offset of the first entry of `variable`, if it is in the layout.
    #[must_use]
    pub fn offset(&self, variable: &VariableRef) -> Option<usize> {
        self.offsets.get(&variable.key()).copied()
    }

    /// Total length of the design vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contains(&self, variable: &VariableRef) -> bool {
        self.offsets.contains_key(&variable.key())
    }
}
