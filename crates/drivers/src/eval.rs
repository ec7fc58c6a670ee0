use std::time::Instant;

use tracing::{debug, warn};

use crate::{
    DesignSpace, DriverBase, Error, EvaluationMode, Executor, FailureMode, FunctionRegistry, Kind,
    Stage, event::{HistoryRecord, LogRow},
};

/// Evaluates every registered function once per design point.
///
/// Wraps a [`DriverBase`] with the step graphs. In sequential mode each
/// function runs its own chain when asked for its value. In parallel mode
/// all needed steps are scheduled up front, shared steps run once, and the
/// values are fetched after the graph has drained.
#[derive(Debug)]
pub struct EvalDriver {
    base: DriverBase,
    mode: EvaluationMode,
    executor: Option<Executor>,
    raw: Vec<f64>,
    gradients: Vec<Option<Vec<f64>>>,
}

impl EvalDriver {
    #[must_use]
    pub fn new(base: DriverBase) -> Self {
        Self {
            base,
            mode: EvaluationMode::default(),
            executor: None,
            raw: Vec::new(),
            gradients: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(&self) -> &DriverBase {
        &self.base
    }

    /// Gives access to the core, e.g. to register more functions.
    ///
    /// Registering functions invalidates the design space; it is rebuilt on
    /// the next evaluation.
    pub fn base_mut(&mut self) -> &mut DriverBase {
        &mut self.base
    }

    #[must_use]
    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Switches between sequential and parallel evaluation and builds the
    /// step graphs.
    ///
    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed or the step
    /// chains form a cycle.
    pub fn set_evaluation_mode(&mut self, mode: EvaluationMode) -> Result<(), Error> {
        self.mode = mode;
        self.ensure_ready()?;
        debug!(?mode, "evaluation mode set");
        Ok(())
    }

    /// Rebuilds the design space and the step graphs from the registry.
    ///
    /// Previously cached values and gradients are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the user directory cannot be resolved or the step
    /// chains form a cycle.
    pub fn preprocess_variables(&mut self) -> Result<(), Error> {
        self.base.preprocess_variables()?;
        self.executor = Some(Executor::build(self.base.registry())?);
        let n = self.base.registry().len();
        self.raw = vec![f64::NAN; n];
        self.gradients = vec![None; n];
        Ok(())
    }

    /// Preprocesses the variables unless the design space is current.
    ///
    /// Returns `true` if preprocessing ran.
    ///
    /// # Errors
    ///
    /// See [`EvalDriver::preprocess_variables`].
    pub fn ensure_ready(&mut self) -> Result<bool, Error> {
        if self.base.is_preprocessed() && self.executor.is_some() {
            return Ok(false);
        }
        self.preprocess_variables()?;
        Ok(true)
    }

    /// Makes `x` the current design point; see
    /// [`DriverBase::handle_variable_change`].
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or the working directory cannot be
    /// rotated.
    pub fn update_design(&mut self, x: &[f64]) -> Result<bool, Error> {
        self.ensure_ready()?;
        self.base.handle_variable_change(x)
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        self.base.registry()
    }

    /// # Errors
    ///
    /// Returns an error if the variables have not been preprocessed.
    pub fn design(&self) -> Result<&DesignSpace, Error> {
        self.base.design()
    }

    /// Evaluates every function at the current design point, unless that
    /// has already happened.
    ///
    /// Returns `true` if a pass ran.
    ///
    /// # Errors
    ///
    /// Returns an error if an evaluation fails and the failure mode does not
    /// allow recovering, or if a hook or the working directory fails.
    pub fn evaluate_functions(&mut self) -> Result<bool, Error> {
        if self.base.fun_ready() {
            return Ok(false);
        }
        let executor = self.executor.as_ref().ok_or(Error::NotPreprocessed)?;
        let start = Instant::now();

        {
            let _cwd = self.base.workdir()?.enter()?;
            self.base.run_hook(Stage::PreFunction)?;

            if let EvaluationMode::Parallel { wait } = self.mode {
                if let Err(err) = executor.run_values(wait) {
                    tolerate(self.base.failure_mode(), err)?;
                }
            }

            for (raw, entry) in self.raw.iter_mut().zip(self.base.registry().entries()) {
                *raw = self.base.value_of(entry)?;
            }

            self.base.run_hook(Stage::PostFunction)?;
        }

        self.base.finish_function_pass(start.elapsed());
        debug!(pass = self.base.counters().fun_evals(), values = ?self.raw, "functions evaluated");
        Ok(true)
    }

    /// Evaluates the gradients of the entries flagged in `needed`, unless a
    /// gradient pass already ran at the current design point.
    ///
    /// Monitors are always skipped. Gradients not evaluated keep their
    /// previous value. Returns `true` if a pass ran.
    ///
    /// # Errors
    ///
    /// Returns an error if a gradient fails and the failure mode does not
    /// allow recovering, or if a hook or the working directory fails.
    ///
    /// # Panics
    ///
    /// Panics if `needed` is shorter than the number of registered functions.
    pub fn evaluate_gradients(&mut self, needed: &[bool]) -> Result<bool, Error> {
        if self.base.jac_ready() {
            return Ok(false);
        }
        let executor = self.executor.as_ref().ok_or(Error::NotPreprocessed)?;
        let entries = self.base.registry().entries().to_vec();
        let wanted = |i: usize| needed[i] && entries[i].kind() != Kind::Monitor;
        let start = Instant::now();

        {
            let _cwd = self.base.workdir()?.enter()?;
            self.base.run_hook(Stage::PreGradient)?;

            if let EvaluationMode::Parallel { wait } = self.mode {
                let active = (0..entries.len()).filter(|&i| wanted(i)).map(|i| &entries[i]);
                if let Err(err) = executor.run_gradients(active, wait) {
                    tolerate(self.base.failure_mode(), err)?;
                }
            }

            let mask = self.base.design()?.mask();
            for i in (0..entries.len()).filter(|&i| wanted(i)) {
                let gradient = self
                    .base
                    .gradient_of(&entries[i], mask, self.gradients[i].as_deref())?;
                self.gradients[i] = Some(gradient);
            }

            self.base.run_hook(Stage::PostGradient)?;
        }

        self.base.finish_gradient_pass(start.elapsed());
        debug!(pass = self.base.counters().grad_evals(), "gradients evaluated");
        Ok(true)
    }

    /// Raw values of the last function pass, in canonical order.
    #[must_use]
    pub fn raw_values(&self) -> &[f64] {
        &self.raw
    }

    /// Scaled values of the entries of one kind.
    #[must_use]
    pub fn scaled(&self, kind: Kind) -> Vec<f64> {
        let range = self.registry().range(kind);
        self.registry().entries()[range.clone()]
            .iter()
            .zip(&self.raw[range])
            .map(|(entry, &raw)| entry.role().scaled(raw))
            .collect()
    }

    /// Last successful gradient of entry `index`, with respect to the
    /// unscaled variables.
    #[must_use]
    pub fn gradient(&self, index: usize) -> Option<&[f64]> {
        self.gradients.get(index)?.as_deref()
    }

    /// Summary of the current point for the log.
    ///
    /// The point is feasible when every equality is within `tol` of zero and
    /// no inequality is below `-tol`. Penalty columns are left empty.
    #[must_use]
    pub fn log_row(&self, tol: f64) -> LogRow {
        let counters = self.base.counters();
        let equalities = self.scaled(Kind::Equality);
        let inequalities = self.scaled(Kind::Inequality);
        let feasible = equalities.iter().all(|eq| eq.abs() <= tol)
            && inequalities.iter().all(|&ineq| ineq >= -tol);

        LogRow {
            fun_evals: counters.fun_evals(),
            grad_evals: counters.grad_evals(),
            fun_time: counters.fun_time(),
            grad_time: counters.grad_time(),
            feasible,
            objectives: self.scaled(Kind::Objective),
            equalities,
            inequalities,
            equality_penalties: Vec::new(),
            inequality_penalties: Vec::new(),
        }
    }

    #[must_use]
    pub fn history_record(&self) -> HistoryRecord {
        HistoryRecord {
            index: self.base.counters().fun_evals(),
            values: self.raw.clone(),
        }
    }
}

/// Lets an aggregated evaluation failure through in soft mode, where the
/// per-function fallbacks take over.
fn tolerate(mode: FailureMode, err: Error) -> Result<(), Error> {
    match mode {
        FailureMode::Hard => Err(err),
        FailureMode::Soft => {
            warn!(error = %err, "continuing after failed evaluations");
            Ok(())
        }
    }
}
