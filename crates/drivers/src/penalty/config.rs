use crate::ConfigError;

/// Settings of the exterior penalty method.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Fields"))]
pub struct PenaltyConfig {
    tol: f64,
    freq: usize,
    rini: f64,
    rmax: f64,
    factor_up: f64,
    factor_down: f64,
    params_if_feasible: bool,
    as_needed: bool,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            freq: 40,
            rini: 8.0,
            rmax: 1024.0,
            factor_up: 4.0,
            factor_down: 0.5,
            params_if_feasible: false,
            as_needed: true,
        }
    }
}

impl PenaltyConfig {
    /// Creates a validated config.
    ///
    /// Penalties start at `rini` and never exceed `rmax`. Every `freq`
    /// gradient passes (never when `freq` is zero) violated constraints have
    /// their penalty multiplied by `factor_up`, and satisfied inequalities by
    /// `factor_down`.
    ///
    /// # Errors
    ///
    /// Returns an error if `tol` is negative, `rini` is not in `(0, rmax]`,
    /// `factor_up` is below one, `factor_down` is not in `(0, 1]`, or any of
    /// them is not finite.
    pub fn new(
        tol: f64,
        freq: usize,
        rini: f64,
        rmax: f64,
        factor_up: f64,
        factor_down: f64,
    ) -> Result<Self, ConfigError> {
        if !tol.is_finite() || tol < 0.0 {
            return Err(ConfigError::Tol);
        }
        if !rini.is_finite() || !rmax.is_finite() || rini <= 0.0 || rini > rmax {
            return Err(ConfigError::Penalties);
        }
        if !factor_up.is_finite() || factor_up < 1.0 {
            return Err(ConfigError::FactorUp);
        }
        if !factor_down.is_finite() || factor_down <= 0.0 || factor_down > 1.0 {
            return Err(ConfigError::FactorDown);
        }

        Ok(Self {
            tol,
            freq,
            rini,
            rmax,
            factor_up,
            factor_down,
            ..Self::default()
        })
    }

    /// Only advance parameters after an update that found the point feasible.
    #[must_use]
    pub fn with_params_if_feasible(mut self, enabled: bool) -> Self {
        self.params_if_feasible = enabled;
        self
    }

    /// Only evaluate gradients of violated inequalities.
    #[must_use]
    pub fn with_as_needed(mut self, enabled: bool) -> Self {
        self.as_needed = enabled;
        self
    }

    /// Constraint violation tolerated before a penalty grows.
    #[must_use]
    pub fn tol(&self) -> f64 {
        self.tol
    }

    /// Gradient passes between automatic updates; zero disables them.
    #[must_use]
    pub fn freq(&self) -> usize {
        self.freq
    }

    #[must_use]
    pub fn rini(&self) -> f64 {
        self.rini
    }

    #[must_use]
    pub fn rmax(&self) -> f64 {
        self.rmax
    }

    #[must_use]
    pub fn factor_up(&self) -> f64 {
        self.factor_up
    }

    #[must_use]
    pub fn factor_down(&self) -> f64 {
        self.factor_down
    }

    #[must_use]
    pub fn params_if_feasible(&self) -> bool {
        self.params_if_feasible
    }

    #[must_use]
    pub fn as_needed(&self) -> bool {
        self.as_needed
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(default)]
struct Fields {
    tol: f64,
    freq: usize,
    rini: f64,
    rmax: f64,
    factor_up: f64,
    factor_down: f64,
    params_if_feasible: bool,
    as_needed: bool,
}

#[cfg(feature = "serde")]
impl Default for Fields {
    fn default() -> Self {
        let config = PenaltyConfig::default();
        Self {
            tol: config.tol,
            freq: config.freq,
            rini: config.rini,
            rmax: config.rmax,
            factor_up: config.factor_up,
            factor_down: config.factor_down,
            params_if_feasible: config.params_if_feasible,
            as_needed: config.as_needed,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<Fields> for PenaltyConfig {
    type Error = ConfigError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        Ok(Self::new(
            fields.tol,
            fields.freq,
            fields.rini,
            fields.rmax,
            fields.factor_up,
            fields.factor_down,
        )?
        .with_params_if_feasible(fields.params_if_feasible)
        .with_as_needed(fields.as_needed))
    }
}
