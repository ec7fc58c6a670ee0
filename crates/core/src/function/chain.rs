use std::{fmt, time::Duration};

use crate::{
    ParameterRef, Reader, StepRef, VariableMask, VariableRef,
    step::drive,
};

use super::{Function, FunctionError};

/// A [`Function`] assembled from step chains and readers.
///
/// The value is read by `value_reader` once the value chain has run. Each
/// input variable has its own gradient reader, read once the gradient chain
/// has run, and must yield one entry per element of the variable.
///
/// Steps already finished by a driver are not run again, so the chains run
/// lazily only when nothing ran them ahead of time.
pub struct ChainFunction {
    name: String,
    value_chain: Vec<StepRef>,
    gradient_chain: Vec<StepRef>,
    value_reader: Box<dyn Reader>,
    inputs: Vec<(VariableRef, Box<dyn Reader>)>,
    parameters: Vec<ParameterRef>,
    default_value: Option<f64>,
    poll_interval: Duration,
}

impl ChainFunction {
    pub fn new(name: impl Into<String>, value_reader: impl Reader + 'static) -> Self {
        Self {
            name: name.into(),
            value_chain: Vec::new(),
            gradient_chain: Vec::new(),
            value_reader: Box::new(value_reader),
            inputs: Vec::new(),
            parameters: Vec::new(),
            default_value: None,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Appends a step to the value chain.
    #[must_use]
    pub fn value_step(mut self, step: &StepRef) -> Self {
        self.value_chain.push(step.clone());
        self
    }

    /// Appends a step to the gradient chain.
    #[must_use]
    pub fn gradient_step(mut self, step: &StepRef) -> Self {
        self.gradient_chain.push(step.clone());
        self
    }

    /// Declares a dependency on `variable` and how to read its gradient.
    #[must_use]
    pub fn input(mut self, variable: &VariableRef, gradient_reader: impl Reader + 'static) -> Self {
        self.inputs.push((variable.clone(), Box::new(gradient_reader)));
        self
    }

    #[must_use]
    pub fn parameter(mut self, parameter: &ParameterRef) -> Self {
        self.parameters.push(parameter.clone());
        self
    }

    /// Sets the value reported when an evaluation fails in soft failure mode.
    #[must_use]
    pub fn with_default_value(mut self, value: f64) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Sets how long to sleep between polls when the function runs its own
    /// chain.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn run(chain: &[StepRef], interval: Duration) -> Result<(), FunctionError> {
        for step in chain {
            let result = drive(&mut *step.borrow_mut(), interval);
            result.map_err(|source| FunctionError::Step {
                step: step.name(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Function for ChainFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn variables(&self) -> Vec<VariableRef> {
        self.inputs.iter().map(|(var, _)| var.clone()).collect()
    }

    fn parameters(&self) -> Vec<ParameterRef> {
        self.parameters.clone()
    }

    fn value_chain(&self) -> Vec<StepRef> {
        self.value_chain.clone()
    }

    fn gradient_chain(&self) -> Vec<StepRef> {
        self.gradient_chain.clone()
    }

    fn value(&mut self) -> Result<f64, FunctionError> {
        Self::run(&self.value_chain, self.poll_interval)?;

        match self.value_reader.read()?.as_slice() {
            &[value] => Ok(value),
            values => Err(FunctionError::Size {
                expected: 1,
                found: values.len(),
            }),
        }
    }

    fn gradient(&mut self, mask: &VariableMask) -> Result<Vec<f64>, FunctionError> {
        Self::run(&self.gradient_chain, self.poll_interval)?;

        let mut gradient = vec![0.0; mask.len()];
        for (variable, reader) in &self.inputs {
            let offset = mask
                .offset(variable)
                .ok_or_else(|| FunctionError::UnknownVariable(variable.borrow().name().to_owned()))?;

            let values = reader.read()?;
            let size = variable.borrow().size();
            if values.len() != size {
                return Err(FunctionError::Size {
                    expected: size,
                    found: values.len(),
                });
            }
            gradient[offset..offset + size].copy_from_slice(&values);
        }
        Ok(gradient)
    }

    fn default_value(&self) -> Option<f64> {
        self.default_value
    }
}

impl fmt::Debug for ChainFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainFunction")
            .field("name", &self.name)
            .field("value_chain", &self.value_chain)
            .field("gradient_chain", &self.gradient_chain)
            .field("variables", &self.variables())
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{cell::RefCell, rc::Rc};

    use approx::assert_relative_eq;

    use crate::{EvaluationStep, ReadError, StepError, StepState, Variable, reader::from_fn};

    #[derive(Default)]
    struct Instant {
        state: StepState,
        runs: usize,
        fail: bool,
    }

    impl EvaluationStep for Instant {
        fn name(&self) -> &str {
            "instant"
        }

        fn state(&self) -> StepState {
            self.state
        }

        fn initialize(&mut self) -> Result<(), StepError> {
            self.runs += 1;
            self.state = StepState::Polling;
            Ok(())
        }

        fn poll(&mut self) -> Result<StepState, StepError> {
            if self.state == StepState::Polling {
                self.state = if self.fail { StepState::Error } else { StepState::Run };
            }
            Ok(self.state)
        }

        fn reset(&mut self) {
            self.state = StepState::Uninitialized;
        }
    }

    fn square(x: &VariableRef, step: &StepRef) -> ChainFunction {
        let (vx, gx) = (x.clone(), x.clone());
        ChainFunction::new("square", from_fn(move || Ok(vec![vx.borrow().current()[0].powi(2)])))
            .value_step(step)
            .gradient_step(step)
            .input(x, from_fn(move || Ok(vec![2.0 * gx.borrow().current()[0]])))
            .poll_interval(Duration::ZERO)
    }

    #[test]
    fn value_runs_chain_once() {
        let x = VariableRef::new(Variable::new("x", [3.0]).unwrap());
        let typed = Rc::new(RefCell::new(Instant::default()));
        let step = StepRef::from(Rc::clone(&typed));
        let mut f = square(&x, &step);

        assert_relative_eq!(f.value().unwrap(), 9.0);
        assert_relative_eq!(f.value().unwrap(), 9.0);
        assert_eq!(typed.borrow().runs, 1);

        f.reset_value_chain();
        assert_eq!(typed.borrow().state, StepState::Uninitialized);
        f.value().unwrap();
        assert_eq!(typed.borrow().runs, 2);
    }

    #[test]
    fn gradient_lands_at_mask_offset() {
        let other = VariableRef::new(Variable::new("other", [0.0, 0.0]).unwrap());
        let x = VariableRef::new(Variable::new("x", [3.0]).unwrap());
        let mut f = square(&x, &StepRef::new(Instant::default()));

        let mut mask = VariableMask::new();
        mask.insert(&other);
        mask.insert(&x);

        assert_eq!(f.gradient(&mask).unwrap(), vec![0.0, 0.0, 6.0]);
    }

    #[test]
    fn missing_variable_in_mask_is_an_error() {
        let x = VariableRef::new(Variable::new("x", [3.0]).unwrap());
        let mut f = square(&x, &StepRef::new(Instant::default()));

        let err = f.gradient(&VariableMask::new()).unwrap_err();
        assert!(matches!(err, FunctionError::UnknownVariable(name) if name == "x"));
    }

    #[test]
    fn failing_step_names_the_step() {
        let x = VariableRef::new(Variable::new("x", [3.0]).unwrap());
        let step = StepRef::new(Instant {
            fail: true,
            ..Instant::default()
        });
        let mut f = square(&x, &step).with_default_value(1e3);

        let err = f.value().unwrap_err();
        assert!(matches!(err, FunctionError::Step { ref step, .. } if step == "instant"));
        assert_eq!(f.default_value(), Some(1e3));
        assert!(f.has_default_value());
    }

    #[test]
    fn value_must_be_a_single_number() {
        let mut f = ChainFunction::new("pair", from_fn(|| Ok(vec![1.0, 2.0])));
        assert!(matches!(
            f.value(),
            Err(FunctionError::Size { expected: 1, found: 2 })
        ));

        let mut g = ChainFunction::new(
            "broken",
            from_fn(|| Err(ReadError::Message("no output".into()))),
        );
        assert!(matches!(g.value(), Err(FunctionError::Read(_))));
    }
}
