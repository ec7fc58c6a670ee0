use std::collections::HashSet;

use fado_core::{ParameterRef, Series, VariableError, VariableMask, VariableRef};

use crate::FunctionRegistry;

/// The variables and parameters reachable from the registered functions.
///
/// Variables are laid out in the order they are first seen when walking the
/// registry (objectives, equalities, inequalities, then monitors). Values
/// exchanged with the optimizer are scaled: `x_opt = x · scale`.
#[derive(Debug, Clone, Default)]
pub struct DesignSpace {
    variables: Vec<VariableRef>,
    parameters: Vec<ParameterRef>,
    mask: VariableMask,
    scales: Vec<f64>,
}

impl DesignSpace {
    /// Collects the variables and parameters of every registered function.
    #[must_use]
    pub fn discover(registry: &FunctionRegistry) -> Self {
        let mut space = Self::default();
        let mut seen_parameters = HashSet::new();

        for entry in registry.entries() {
            let function = entry.function().borrow();

            for variable in function.variables() {
                if space.mask.insert(&variable) {
                    let var = variable.borrow();
                    space.scales.extend(std::iter::repeat_n(var.scale(), var.size()));
                    drop(var);
                    space.variables.push(variable);
                }
            }

            for parameter in function.parameters() {
                if seen_parameters.insert(parameter.key()) {
                    space.parameters.push(parameter);
                }
            }
        }

        space
    }

    /// Length of the design vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    #[must_use]
    pub fn variables(&self) -> &[VariableRef] {
        &self.variables
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterRef] {
        &self.parameters
    }

    #[must_use]
    pub fn mask(&self) -> &VariableMask {
        &self.mask
    }

    #[must_use]
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Concatenates one series of every variable, scaled.
    #[must_use]
    pub fn series(&self, series: Series) -> Vec<f64> {
        self.variables
            .iter()
            .flat_map(|variable| {
                let variable = variable.borrow();
                let scale = variable.scale();
                variable
                    .series(series)
                    .iter()
                    .map(|value| value * scale)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Pushes the scaled design vector `x` into the variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a slice of `x` does not fit its variable.
    ///
    /// # Panics
    ///
    /// Panics if `x` is shorter than [`DesignSpace::len`].
    pub fn apply(&self, x: &[f64]) -> Result<(), VariableError> {
        let mut offset = 0;
        for variable in &self.variables {
            let mut variable = variable.borrow_mut();
            let size = variable.size();
            let scale = variable.scale();
            let values: Vec<f64> = x[offset..offset + size].iter().map(|v| v / scale).collect();
            variable.set_current(&values)?;
            offset += size;
        }
        Ok(())
    }

    /// Converts a gradient with respect to the unscaled variables into one
    /// with respect to the design vector.
    pub fn unscale_gradient(&self, gradient: &mut [f64]) {
        for (g, scale) in gradient.iter_mut().zip(&self.scales) {
            *g /= scale;
        }
    }
}
