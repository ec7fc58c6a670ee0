//! Mock steps and small functions for unit tests.

use std::{cell::RefCell, rc::Rc, time::Duration};

use fado_core::{
    ChainFunction, EvaluationStep, FunctionRef, ParameterRef, StepError, StepRef, StepState,
    VariableRef, reader::from_fn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Started,
    Finished,
}

/// Shared record of when steps start and finish.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Rc<RefCell<Vec<(Mark, String)>>>);

impl Journal {
    pub(crate) fn started(&self) -> Vec<String> {
        self.names(Mark::Started)
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.names(Mark::Finished)
    }

    /// Every mark in the order it happened, as `"start a"` or `"finish a"`.
    pub(crate) fn timeline(&self) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .map(|(mark, name)| match mark {
                Mark::Started => format!("start {name}"),
                Mark::Finished => format!("finish {name}"),
            })
            .collect()
    }

    fn names(&self, mark: Mark) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|(m, _)| *m == mark)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn push(&self, mark: Mark, name: &str) {
        self.0.borrow_mut().push((mark, name.to_owned()));
    }
}

/// A step that finishes after a fixed number of polls.
#[derive(Debug)]
pub(crate) struct MockStep {
    name: String,
    polls_to_finish: usize,
    polls: usize,
    fail: bool,
    state: StepState,
    starts: usize,
    variables: Vec<String>,
    journal: Option<Journal>,
}

impl MockStep {
    pub(crate) fn new(name: &str, polls_to_finish: usize) -> Self {
        Self {
            name: name.to_owned(),
            polls_to_finish,
            polls: 0,
            fail: false,
            state: StepState::Uninitialized,
            starts: 0,
            variables: Vec::new(),
            journal: None,
        }
    }

    pub(crate) fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Ends in [`StepState::Error`] instead of [`StepState::Run`].
    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn set_failing(&mut self, fail: bool) {
        self.fail = fail;
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts
    }

    /// Names of the variables handed to the step.
    pub(crate) fn variables(&self) -> Vec<String> {
        self.variables.clone()
    }
}

impl EvaluationStep for MockStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> StepState {
        self.state
    }

    fn initialize(&mut self) -> Result<(), StepError> {
        self.starts += 1;
        self.polls = 0;
        self.state = StepState::Polling;
        if let Some(journal) = &self.journal {
            journal.push(Mark::Started, &self.name);
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<StepState, StepError> {
        if self.state == StepState::Polling {
            self.polls += 1;
            if self.polls >= self.polls_to_finish {
                self.state = if self.fail {
                    StepState::Error
                } else {
                    StepState::Run
                };
                if let Some(journal) = &self.journal {
                    journal.push(Mark::Finished, &self.name);
                }
            }
        }
        Ok(self.state)
    }

    fn reset(&mut self) {
        self.state = StepState::Uninitialized;
    }

    fn update_variables(&mut self, variables: &[VariableRef]) {
        self.variables = variables.iter().map(|v| v.borrow().name().to_owned()).collect();
    }
}

fn sum_of(variables: &[VariableRef]) -> f64 {
    variables.iter().map(|v| v.borrow().current().iter().sum::<f64>()).sum()
}

/// The sum of every entry of `variables`.
pub(crate) fn linear(name: &str, variables: &[&VariableRef]) -> FunctionRef {
    let owned: Vec<VariableRef> = variables.iter().map(|&v| v.clone()).collect();
    let mut function = ChainFunction::new(name, from_fn(move || Ok(vec![sum_of(&owned)])));
    for &variable in variables {
        let size = variable.borrow().size();
        function = function.input(variable, from_fn(move || Ok(vec![1.0; size])));
    }
    FunctionRef::new(function.poll_interval(Duration::ZERO))
}

/// `x[0]²` with the given step chains.
pub(crate) fn chained(name: &str, x: &VariableRef, value_chain: &[StepRef], gradient_chain: &[StepRef]) -> FunctionRef {
    let (vx, gx) = (x.clone(), x.clone());
    let mut function = ChainFunction::new(name, from_fn(move || Ok(vec![vx.borrow().current()[0].powi(2)])))
        .input(x, from_fn(move || Ok(vec![2.0 * gx.borrow().current()[0]])))
        .poll_interval(Duration::ZERO);
    for step in value_chain {
        function = function.value_step(step);
    }
    for step in gradient_chain {
        function = function.gradient_step(step);
    }
    FunctionRef::new(function)
}

/// `x[0]²` computed by `step`.
pub(crate) fn quadratic(name: &str, x: &VariableRef, step: &StepRef) -> FunctionRef {
    chained(name, x, std::slice::from_ref(step), &[])
}

/// A function of no variables.
pub(crate) fn constant(name: &str, value: f64) -> FunctionRef {
    FunctionRef::new(ChainFunction::new(name, from_fn(move || Ok(vec![value]))))
}

/// `x[0] + p`.
pub(crate) fn with_parameter(name: &str, x: &VariableRef, p: &ParameterRef) -> FunctionRef {
    let (vx, vp) = (x.clone(), p.clone());
    FunctionRef::new(
        ChainFunction::new(
            name,
            from_fn(move || Ok(vec![vx.borrow().current()[0] + vp.borrow().value()])),
        )
        .input(x, from_fn(|| Ok(vec![1.0])))
        .parameter(p),
    )
}
