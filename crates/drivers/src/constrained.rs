//! Driver for optimizers that handle constraints themselves.

use fado_core::Observer;

use crate::{
    ConfigError, DriverBase, Error, EvalDriver, EvaluationMode, Kind,
    event::{Action, Event, Header},
};

/// Which inequality gradients a gradient pass evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GradientMode {
    /// Every constraint, every time.
    #[default]
    Always,

    /// Only inequalities whose scaled value is below `threshold`.
    AsNeeded { threshold: f64 },
}

impl GradientMode {
    /// # Errors
    ///
    /// Returns an error if `threshold` is not finite.
    pub fn as_needed(threshold: f64) -> Result<Self, ConfigError> {
        if threshold.is_finite() {
            Ok(Self::AsNeeded { threshold })
        } else {
            Err(ConfigError::Threshold)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Equality,
    Inequality,
}

/// Exposes objective, constraints and their derivatives separately.
///
/// Constraint values are scaled and shifted so equalities target zero and
/// inequalities are feasible when non-negative. Derivatives are with respect
/// to the scaled design vector.
#[derive(Debug)]
pub struct ConstrainedDriver<Obs = ()> {
    eval: EvalDriver,
    mode: GradientMode,
    tol: f64,
    initialized: bool,
    observer: Obs,
}

impl ConstrainedDriver {
    #[must_use]
    pub fn new(base: DriverBase) -> Self {
        Self {
            eval: EvalDriver::new(base),
            mode: GradientMode::default(),
            tol: 1e-6,
            initialized: false,
            observer: (),
        }
    }
}

impl<Obs: Observer<Event, Action>> ConstrainedDriver<Obs> {
    #[must_use]
    pub fn with_observer<O: Observer<Event, Action>>(self, observer: O) -> ConstrainedDriver<O> {
        ConstrainedDriver {
            eval: self.eval,
            mode: self.mode,
            tol: self.tol,
            initialized: false,
            observer,
        }
    }

    #[must_use]
    pub fn with_gradient_mode(mut self, mode: GradientMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the constraint tolerance used to flag feasible points in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if `tol` is negative or not finite.
    pub fn with_tolerance(mut self, tol: f64) -> Result<Self, ConfigError> {
        if !tol.is_finite() || tol < 0.0 {
            return Err(ConfigError::Tol);
        }
        self.tol = tol;
        Ok(self)
    }

    #[must_use]
    pub fn eval(&self) -> &EvalDriver {
        &self.eval
    }

    pub fn base_mut(&mut self) -> &mut DriverBase {
        self.eval.base_mut()
    }

    #[must_use]
    pub fn observer(&self) -> &Obs {
        &self.observer
    }

    /// # Errors
    ///
    /// See [`EvalDriver::set_evaluation_mode`].
    pub fn set_evaluation_mode(&mut self, mode: EvaluationMode) -> Result<(), Error> {
        self.eval.set_evaluation_mode(mode)
    }

    /// # Errors
    ///
    /// See [`EvalDriver::preprocess_variables`].
    pub fn preprocess_variables(&mut self) -> Result<(), Error> {
        self.eval.preprocess_variables()?;
        self.initialized = false;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn ensure_initialized(&mut self) -> Result<(), Error> {
        if self.eval.ensure_ready()? {
            self.initialized = false;
        }
        if !self.initialized {
            let header = Header::from_registry(self.eval.registry(), false);
            self.observer.observe(&Event::Initialized { header });
            self.initialized = true;
        }
        Ok(())
    }

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
    pub fn num_variables(&mut self) -> Result<usize, Error> {
        self.ensure_initialized()?;
        self.eval.base().num_variables()
    }

    /// Scaled lower and upper bounds of the design vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the variables cannot be preprocessed.
    pub fn bounds(&mut self) -> Result<(Vec<f64>, Vec<f64>), Error> {
        self.ensure_initialized()?;
        let base = self.eval.base();
        Ok((base.lower_bound()?, base.upper_bound()?))
    }

    /// Sum of the scaled objectives at `x`.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn fun(&mut self, x: &[f64]) -> Result<f64, Error> {
        self.evaluate_at(x)?;
        Ok(self.eval.scaled(Kind::Objective).iter().sum())
    }

    /// Gradient of [`ConstrainedDriver::fun`].
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn grad(&mut self, x: &[f64]) -> Result<Vec<f64>, Error> {
        self.evaluate_at(x)?;
        self.evaluate_gradients()?;

        let design = self.eval.design()?;
        let mut gradient = vec![0.0; design.len()];
        let registry = self.eval.registry();
        for i in registry.range(Kind::Objective) {
            let entry = &registry.entries()[i];
            let partial = self.eval.gradient(i).ok_or_else(|| Error::MissingGradient {
                name: entry.function().name(),
            })?;
            let scale = entry.role().scale();
            for (g, d) in gradient.iter_mut().zip(partial) {
                *g += scale * d;
            }
        }
        design.unscale_gradient(&mut gradient);
        Ok(gradient)
    }

    /// Scaled equality values followed by scaled inequality values.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn constraints(&mut self, x: &[f64]) -> Result<Vec<f64>, Error> {
        self.evaluate_at(x)?;
        let mut values = self.eval.scaled(Kind::Equality);
        values.extend(self.eval.scaled(Kind::Inequality));
        Ok(values)
    }

    /// One row per constraint, in the order of
    /// [`ConstrainedDriver::constraints`].
    ///
    /// Rows of inactive inequalities in as-needed mode hold their last
    /// evaluated gradient, or zeros if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is invalid or an evaluation fails without a
    /// fallback.
    pub fn constraint_jacobian(&mut self, x: &[f64]) -> Result<Vec<Vec<f64>>, Error> {
        self.evaluate_at(x)?;
        self.evaluate_gradients()?;

        let design = self.eval.design()?;
        let registry = self.eval.registry();
        let start = registry.range(Kind::Equality).start;
        let end = registry.range(Kind::Inequality).end;

        Ok((start..end)
            .map(|i| {
                let scale = registry.entries()[i].role().scale();
                let mut row: Vec<f64> = self
                    .eval
                    .gradient(i)
                    .map_or_else(|| vec![0.0; design.len()], |g| g.iter().map(|d| d * scale).collect());
                design.unscale_gradient(&mut row);
                row
            })
            .collect())
    }

    /// Bounds of each constraint value: `[0, 0]` for equalities and
    /// `[0, ∞)` for inequalities.
    #[must_use]
    pub fn constraint_bounds(&self) -> Vec<(f64, f64)> {
        self.constraint_kinds()
            .into_iter()
            .map(|kind| match kind {
                ConstraintKind::Equality => (0.0, 0.0),
                ConstraintKind::Inequality => (0.0, f64::INFINITY),
            })
            .collect()
    }

    #[must_use]
    pub fn constraint_kinds(&self) -> Vec<ConstraintKind> {
        let registry = self.eval.registry();
        let equalities = registry.count(Kind::Equality);
        let inequalities = registry.count(Kind::Inequality);
        std::iter::repeat_n(ConstraintKind::Equality, equalities)
            .chain(std::iter::repeat_n(ConstraintKind::Inequality, inequalities))
            .collect()
    }

    fn evaluate_at(&mut self, x: &[f64]) -> Result<(), Error> {
        self.ensure_initialized()?;
        self.eval.update_design(x)?;
        if self.eval.evaluate_functions()? {
            let record = self.eval.history_record();
            self.observer.observe(&Event::FunctionsEvaluated { record });
        }
        Ok(())
    }

    fn evaluate_gradients(&mut self) -> Result<(), Error> {
        let needed: Vec<bool> = self
            .eval
            .registry()
            .entries()
            .iter()
            .zip(self.eval.raw_values())
            .map(|(entry, &raw)| match (entry.role().kind(), self.mode) {
                (Kind::Inequality, GradientMode::AsNeeded { threshold }) => entry.role().scaled(raw) < threshold,
                (Kind::Monitor, _) => false,
                _ => true,
            })
            .collect();

        if self.eval.evaluate_gradients(&needed)? {
            let row = self.eval.log_row(self.tol);
            self.observer.observe(&Event::GradientEvaluated { row });
        }
        Ok(())
    }
}
