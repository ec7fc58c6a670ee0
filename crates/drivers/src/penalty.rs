//! Exterior penalty method.
//!
//! [`ExteriorPenaltyDriver`] turns a constrained problem into an
//! unconstrained one for optimizers that only see `fun(x)` and `grad(x)`:
//!
//! ```text
//! f = Σ obj + Σ r_eq · eq² + Σ r_ineq · min(0, ineq) · ineq
//! ```
//!
//! where every value is scaled and inequalities are feasible when
//! non-negative. Penalty coefficients start at `rini` and are adapted by
//! [`ExteriorPenaltyDriver::update`]: violated constraints have their
//! penalty multiplied by `factor_up` (up to `rmax`), strictly satisfied
//! inequalities have theirs relaxed towards `rini`. An update also advances
//! every parameter and forces the next call to re-evaluate.
//!
//! # Observer Events
//!
//! - [`Event::Initialized`] once, with the function names
//! - [`Event::FunctionsEvaluated`] after every function pass
//! - [`Event::GradientEvaluated`] after every gradient pass
//! - [`Event::PenaltiesUpdated`] after every update
//!
//! Observers can return [`Action::UpdatePenalties`] in response to a
//! gradient pass to update the penalties right away.

mod config;
mod state;

#[cfg(test)]
mod tests;

pub use config::PenaltyConfig;
pub use state::penalized_value;

use fado_core::Observer;
use tracing::info;

use crate::{
    DriverBase, Error, EvalDriver, EvaluationMode, Kind,
    event::{Action, Event, Header, LogRow},
};

use state::PenaltyState;

/// Presents a constrained problem as an unconstrained penalized one.
#[derive(Debug)]
pub struct ExteriorPenaltyDriver<Obs = ()> {
    eval: EvalDriver,
    config: PenaltyConfig,
    state: Option<PenaltyState>,
    observer: Obs,
}

impl ExteriorPenaltyDriver {
    #[must_use]
    pub fn new(base: DriverBase, config: PenaltyConfig) -> Self {
        Self {
            eval: EvalDriver::new(base),
            config,
            state: None,
            observer: (),
        }
    }
}

impl<Obs: Observer<Event, Action>> ExteriorPenaltyDriver<Obs> {
    /// Replaces the observer.
    ///
    /// The new observer is sent [`Event::Initialized`] on first use, and
    /// penalties start over at `rini`.
    #[must_use]
    pub fn with_observer<O: Observer<Event, Action>>(self, observer: O) -> ExteriorPenaltyDriver<O> {
        ExteriorPenaltyDriver {
            eval: self.eval,
            config: self.config,
            state: None,
            observer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PenaltyConfig {
        &self.config
    }

    #[must_use]
    pub fn eval(&self) -> &EvalDriver {
        &self.eval
    }

    #[must_use]
    pub fn base(&self) -> &DriverBase {
        self.eval.base()
    }

    /// Gives access to the core, e.g. to register more functions.
    pub fn base_mut(&mut self) -> &mut DriverBase {
        self.eval.base_mut()
    }

    #[must_use]
    pub fn observer(&self) -> &Obs {
        &self.observer
    }

    /// Penalties carry over unless the switch had to preprocess the
    /// variables.
    ///
    /// # Errors
    ///
    /// See [`EvalDriver::set_evaluation_mode`].
    pub fn set_evaluation_mode(&mut self, mode: EvaluationMode) -> Result<(), Error> {
        self.eval.set_evaluation_mode(mode)
    }

    /// Rebuilds the design space; penalties start over at `rini`.
    ///
    /// # Errors
    ///
    /// See [`EvalDriver::preprocess_variables`].
    pub fn preprocess_variables(&mut self) -> Result<(), Error> {
        self.eval.preprocess_variables()?;
        self.state = None;
        Ok(())
    }

    /// Sets up the penalties and announces the problem to the observer.
    ///
    /// Does nothing if already initialized for the current design space.
    /// Called by every other operation, so calling it explicitly is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn ensure_initialized(&mut self) -> Result<(), Error> {
        if self.eval.ensure_ready()? {
            self.state = None;
        }
        if self.state.is_some() {
            return Ok(());
        }

        let registry = self.eval.registry();
        self.state = Some(PenaltyState::new(
            &self.config,
            registry.count(Kind::Equality),
            registry.count(Kind::Inequality),
        ));

        let header = Header::from_registry(registry, true);
        self.observer.observe(&Event::Initialized { header });
        Ok(())
    }

    /// Scaled initial design vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn initial(&mut self) -> Result<Vec<f64>, Error> {
        self.ensure_initialized()?;
        self.eval.base().initial()
    }

    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn lower_bound(&mut self) -> Result<Vec<f64>, Error> {
        self.ensure_initialized()?;
        self.eval.base().lower_bound()
    }

    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn upper_bound(&mut self) -> Result<Vec<f64>, Error> {
        self.ensure_initialized()?;
        self.eval.base().upper_bound()
    }

    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn num_variables(&mut self) -> Result<usize, Error> {
        self.ensure_initialized()?;
        self.eval.base().num_variables()
    }

    /// Penalized objective at `x`.
    ///
    /// Functions are evaluated at most once per design point.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn fun(&mut self, x: &[f64]) -> Result<f64, Error> {
        self.ensure_initialized()?;
        self.eval.update_design(x)?;
        self.evaluate_functions()?;

        let (eq_pen, ineq_pen) = self.penalties();
        Ok(penalized_value(
            &self.eval.scaled(Kind::Objective),
            &self.eval.scaled(Kind::Equality),
            &self.eval.scaled(Kind::Inequality),
            eq_pen,
            ineq_pen,
        ))
    }

    /// Gradient of the penalized objective at `x`, with respect to the
    /// scaled design vector.
    ///
    /// Runs an automatic [`ExteriorPenaltyDriver::update`] every `freq`
    /// gradient passes, or when the observer asks for one.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn grad(&mut self, x: &[f64]) -> Result<Vec<f64>, Error> {
        self.ensure_initialized()?;
        self.eval.update_design(x)?;
        self.evaluate_functions()?;

        let needed = self.needed();
        let ran = self.eval.evaluate_gradients(&needed)?;
        let gradient = self.assemble_gradient()?;

        if ran {
            let row = self.log_row();
            let action = self.observer.observe(&Event::GradientEvaluated { row });

            let freq = self.config.freq();
            let due = freq > 0 && self.eval.base().counters().grad_evals() % freq == 0;
            if due || action == Some(Action::UpdatePenalties) {
                self.update()?;
            }
        }

        Ok(gradient)
    }

    /// Adapts the penalties to the last evaluated point.
    ///
    /// Also advances every parameter (only when the point is feasible if so
    /// configured) and forgets the cached design point so the next call
    /// re-evaluates. Returns whether the point was feasible.
    ///
    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn update(&mut self) -> Result<bool, Error> {
        self.ensure_initialized()?;

        let equalities = self.eval.scaled(Kind::Equality);
        let inequalities = self.eval.scaled(Kind::Inequality);
        let state = self.state.as_mut().ok_or(Error::NotPreprocessed)?;
        let feasible = state.adjust(&self.config, &equalities, &inequalities);

        if feasible || !self.config.params_if_feasible() {
            for parameter in self.eval.design()?.parameters() {
                parameter.borrow_mut().increment();
            }
        }
        self.eval.base_mut().invalidate();

        info!(
            feasible,
            equality_penalties = ?state.equalities,
            inequality_penalties = ?state.inequalities,
            "penalties updated"
        );

        let row = self.log_row();
        self.observer.observe(&Event::PenaltiesUpdated { row });
        Ok(feasible)
    }

    /// Current equality penalties; empty before initialization.
    #[must_use]
    pub fn equality_penalties(&self) -> &[f64] {
        self.penalties().0
    }

    /// Current inequality penalties; empty before initialization.
    #[must_use]
    pub fn inequality_penalties(&self) -> &[f64] {
        self.penalties().1
    }

    fn penalties(&self) -> (&[f64], &[f64]) {
        match &self.state {
            Some(state) => (state.equalities.as_slice(), state.inequalities.as_slice()),
            None => (&[][..], &[][..]),
        }
    }

    fn evaluate_functions(&mut self) -> Result<(), Error> {
        if self.eval.evaluate_functions()? {
            let record = self.eval.history_record();
            self.observer.observe(&Event::FunctionsEvaluated { record });
        }
        Ok(())
    }

    /// Objectives and equalities always need a gradient, inequalities only
    /// when violated (or always, unless `as_needed`), monitors never.
    fn needed(&self) -> Vec<bool> {
        self.eval
            .registry()
            .entries()
            .iter()
            .zip(self.eval.raw_values())
            .map(|(entry, &raw)| match entry.role().kind() {
                Kind::Objective | Kind::Equality => true,
                Kind::Inequality => !self.config.as_needed() || entry.role().scaled(raw) < 0.0,
                Kind::Monitor => false,
            })
            .collect()
    }

    fn assemble_gradient(&self) -> Result<Vec<f64>, Error> {
        let design = self.eval.design()?;
        let (eq_pen, ineq_pen) = self.penalties();
        let registry = self.eval.registry();
        let eq_start = registry.range(Kind::Equality).start;
        let ineq_start = registry.range(Kind::Inequality).start;

        let mut gradient = vec![0.0; design.len()];
        for (i, (entry, &raw)) in registry.entries().iter().zip(self.eval.raw_values()).enumerate() {
            let role = entry.role();
            let value = role.scaled(raw);
            let factor = match role.kind() {
                Kind::Objective => 1.0,
                Kind::Equality => 2.0 * eq_pen[i - eq_start] * value,
                Kind::Inequality if value < 0.0 => 2.0 * ineq_pen[i - ineq_start] * value,
                Kind::Inequality | Kind::Monitor => continue,
            } * role.scale();

            let partial = self.eval.gradient(i).ok_or_else(|| Error::MissingGradient {
                name: entry.function().name(),
            })?;
            for (g, d) in gradient.iter_mut().zip(partial) {
                *g += factor * d;
            }
        }

        design.unscale_gradient(&mut gradient);
        Ok(gradient)
    }

    fn log_row(&self) -> LogRow {
        let (eq_pen, ineq_pen) = self.penalties();
        LogRow {
            equality_penalties: eq_pen.to_vec(),
            inequality_penalties: ineq_pen.to_vec(),
            ..self.eval.log_row(self.config.tol())
        }
    }
}
