//! Role-tagged functions in canonical order.

use std::ops::Range;

use fado_core::FunctionRef;

use crate::ConfigError;

/// Optimization direction of an objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    #[default]
    Minimize,
    Maximize,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Self::Minimize => 1.0,
            Self::Maximize => -1.0,
        }
    }
}

/// What a registered function is used for.
///
/// Scales are signed: a maximized objective has a negative scale, and so does
/// an upper-bound inequality, so that `scaled >= 0` always means feasible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role {
    Objective { scale: f64 },
    Equality { target: f64, scale: f64 },
    Inequality { bound: f64, scale: f64 },
    Monitor,
}

/// Role without its data, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Objective,
    Equality,
    Inequality,
    Monitor,
}

impl Role {
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Objective { .. } => Kind::Objective,
            Self::Equality { .. } => Kind::Equality,
            Self::Inequality { .. } => Kind::Inequality,
            Self::Monitor => Kind::Monitor,
        }
    }

    /// Factor applied to the raw value and gradient; `1` for monitors.
    #[must_use]
    pub fn scale(&self) -> f64 {
        match *self {
            Self::Objective { scale }
            | Self::Equality { scale, .. }
            | Self::Inequality { scale, .. } => scale,
            Self::Monitor => 1.0,
        }
    }

    /// Maps a raw function value to what the drivers work with.
    ///
    /// Objectives are scaled, constraints are shifted by their target or
    /// bound and then scaled. Monitors pass through.
    #[must_use]
    pub fn scaled(&self, raw: f64) -> f64 {
        match *self {
            Self::Objective { scale } => raw * scale,
            Self::Equality { target, scale } => (raw - target) * scale,
            Self::Inequality { bound, scale } => (raw - bound) * scale,
            Self::Monitor => raw,
        }
    }
}

/// A function and its role.
#[derive(Debug, Clone)]
pub struct Entry {
    function: FunctionRef,
    role: Role,
}

impl Entry {
    #[must_use]
    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.role.kind()
    }
}

/// Registered functions, kept grouped as objectives, equalities,
/// inequalities, then monitors, each group in registration order.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: Vec<Entry>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an objective with effective scale `scale · weight`, negated
    /// when maximizing.
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` or `weight` is not finite and positive.
    pub fn add_objective(
        &mut self,
        direction: Direction,
        function: &FunctionRef,
        scale: f64,
        weight: f64,
    ) -> Result<(), ConfigError> {
        check_scale(function, scale)?;
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ConfigError::NonPositiveWeight {
                function: function.name(),
                weight,
            });
        }
        let scale = scale * weight * direction.sign();
        self.push(function, Role::Objective { scale });
        Ok(())
    }

    /// Registers the constraint `function == target`.
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive or `target` is
    /// not finite.
    pub fn add_equality(&mut self, function: &FunctionRef, target: f64, scale: f64) -> Result<(), ConfigError> {
        check_scale(function, scale)?;
        check_finite(function, "target", target)?;
        self.push(function, Role::Equality { target, scale });
        Ok(())
    }

    /// Registers the constraint `function >= bound`.
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive or `bound` is
    /// not finite.
    pub fn add_lower_bound(&mut self, function: &FunctionRef, bound: f64, scale: f64) -> Result<(), ConfigError> {
        check_scale(function, scale)?;
        check_finite(function, "bound", bound)?;
        self.push(function, Role::Inequality { bound, scale });
        Ok(())
    }

    /// Registers the constraint `function <= bound`.
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive or `bound` is
    /// not finite.
    pub fn add_upper_bound(&mut self, function: &FunctionRef, bound: f64, scale: f64) -> Result<(), ConfigError> {
        check_scale(function, scale)?;
        check_finite(function, "bound", bound)?;
        self.push(function, Role::Inequality { bound, scale: -scale });
        Ok(())
    }

    /// Registers `lower <= function <= upper` as two inequalities scaled by
    /// the width of the range.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is empty or not finite.
    pub fn add_range(&mut self, function: &FunctionRef, lower: f64, upper: f64) -> Result<(), ConfigError> {
        check_finite(function, "lower bound", lower)?;
        check_finite(function, "upper bound", upper)?;
        if lower >= upper {
            return Err(ConfigError::InvalidBounds {
                function: function.name(),
                lower,
                upper,
            });
        }
        let scale = 1.0 / (upper - lower);
        self.add_lower_bound(function, lower, scale)?;
        self.add_upper_bound(function, upper, scale)
    }

    /// Registers a function that is evaluated and recorded but never
    /// optimized.
    pub fn add_monitor(&mut self, function: &FunctionRef) {
        self.push(function, Role::Monitor);
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index range of the entries of one kind.
    #[must_use]
    pub fn range(&self, kind: Kind) -> Range<usize> {
        let start = self.entries.partition_point(|e| e.kind() < kind);
        let end = self.entries.partition_point(|e| e.kind() <= kind);
        start..end
    }

    /// Entries of one kind, in registration order.
    #[must_use]
    pub fn of_kind(&self, kind: Kind) -> &[Entry] {
        &self.entries[self.range(kind)]
    }

    #[must_use]
    pub fn count(&self, kind: Kind) -> usize {
        self.range(kind).len()
    }

    fn push(&mut self, function: &FunctionRef, role: Role) {
        let at = self.entries.partition_point(|e| e.kind() <= role.kind());
        self.entries.insert(
            at,
            Entry {
                function: function.clone(),
                role,
            },
        );
    }
}

fn check_scale(function: &FunctionRef, scale: f64) -> Result<(), ConfigError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveScale {
            function: function.name(),
            scale,
        })
    }
}

fn check_finite(function: &FunctionRef, what: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite {
            function: function.name(),
            what,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::test_utils::constant;

    #[test]
    fn entries_are_grouped_by_kind() {
        let mut registry = FunctionRegistry::new();
        let (m, i, o, e) = (constant("m", 0.0), constant("i", 0.0), constant("o", 0.0), constant("e", 0.0));

        registry.add_monitor(&m);
        registry.add_lower_bound(&i, 0.0, 1.0).unwrap();
        registry.add_objective(Direction::Minimize, &o, 1.0, 1.0).unwrap();
        registry.add_equality(&e, 0.0, 1.0).unwrap();
        registry.add_upper_bound(&i, 5.0, 1.0).unwrap();

        let names: Vec<_> = registry.entries().iter().map(|e| e.function().name()).collect();
        assert_eq!(names, ["o", "e", "i", "i", "m"]);
        assert_eq!(registry.range(Kind::Inequality), 2..4);
        assert_eq!(registry.count(Kind::Equality), 1);
    }

    #[test]
    fn scaled_values_are_feasible_when_non_negative() {
        let mut registry = FunctionRegistry::new();
        let f = constant("f", 0.0);
        registry.add_lower_bound(&f, 1.0, 2.0).unwrap();
        registry.add_upper_bound(&f, 3.0, 2.0).unwrap();

        let [lower, upper] = [0, 1].map(|i| registry.entries()[i].role());

        // Inside the range both are feasible.
        assert_relative_eq!(lower.scaled(2.0), 2.0);
        assert_relative_eq!(upper.scaled(2.0), 2.0);

        // Above the upper bound only the upper one is violated.
        assert!(lower.scaled(4.0) > 0.0);
        assert_relative_eq!(upper.scaled(4.0), -2.0);
    }

    #[test]
    fn objective_scale_includes_weight_and_direction() {
        let mut registry = FunctionRegistry::new();
        let f = constant("f", 0.0);
        registry.add_objective(Direction::Maximize, &f, 2.0, 0.5).unwrap();

        let role = registry.entries()[0].role();
        assert_eq!(role, Role::Objective { scale: -1.0 });
        assert_relative_eq!(role.scaled(3.0), -3.0);
    }

    #[test]
    fn range_uses_inverse_width() {
        let mut registry = FunctionRegistry::new();
        let f = constant("f", 0.0);
        registry.add_range(&f, 1.0, 5.0).unwrap();

        assert_eq!(
            registry.of_kind(Kind::Inequality)[0].role(),
            Role::Inequality { bound: 1.0, scale: 0.25 }
        );
        assert_eq!(
            registry.of_kind(Kind::Inequality)[1].role(),
            Role::Inequality { bound: 5.0, scale: -0.25 }
        );

        assert!(matches!(
            registry.add_range(&f, 2.0, 2.0),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn bad_scales_are_rejected() {
        let mut registry = FunctionRegistry::new();
        let f = constant("f", 0.0);

        for scale in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                registry.add_equality(&f, 0.0, scale),
                Err(ConfigError::NonPositiveScale { .. })
            ));
        }
        assert!(matches!(
            registry.add_objective(Direction::Minimize, &f, 1.0, 0.0),
            Err(ConfigError::NonPositiveWeight { .. })
        ));
        assert!(matches!(
            registry.add_lower_bound(&f, f64::NAN, 1.0),
            Err(ConfigError::NonFinite { what: "bound", .. })
        ));
        assert!(registry.is_empty());
    }
}
