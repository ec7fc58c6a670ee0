use super::PenaltyConfig;

/// Penalty coefficients of every constraint.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct PenaltyState {
    pub(super) equalities: Vec<f64>,
    pub(super) inequalities: Vec<f64>,
}

impl PenaltyState {
    pub(super) fn new(config: &PenaltyConfig, equalities: usize, inequalities: usize) -> Self {
        Self {
            equalities: vec![config.rini(); equalities],
            inequalities: vec![config.rini(); inequalities],
        }
    }

    /// Grows the penalties of violated constraints and relaxes those of
    /// strictly satisfied inequalities.
    ///
    /// Equalities are only capped at `rmax`; inequalities stay within
    /// `[rini, rmax]`. Returns whether every constraint is within `tol`.
    pub(super) fn adjust(&mut self, config: &PenaltyConfig, equalities: &[f64], inequalities: &[f64]) -> bool {
        let mut feasible = true;

        for (penalty, &value) in self.equalities.iter_mut().zip(equalities) {
            if value.abs() > config.tol() {
                *penalty = (*penalty * config.factor_up()).min(config.rmax());
                feasible = false;
            }
        }

        for (penalty, &value) in self.inequalities.iter_mut().zip(inequalities) {
            if value < -config.tol() {
                *penalty = (*penalty * config.factor_up()).min(config.rmax());
                feasible = false;
            } else if value > 0.0 {
                *penalty = (*penalty * config.factor_down()).max(config.rini());
            }
        }

        feasible
    }
}

/// The penalized objective seen by the optimizer.
///
/// `Σ obj + Σ r·eq² + Σ r·min(0, ineq)·ineq`, with scaled values.
#[must_use]
pub fn penalized_value(
    objectives: &[f64],
    equalities: &[f64],
    inequalities: &[f64],
    equality_penalties: &[f64],
    inequality_penalties: &[f64],
) -> f64 {
    let objective: f64 = objectives.iter().sum();
    let equality: f64 = equalities
        .iter()
        .zip(equality_penalties)
        .map(|(eq, r)| r * eq * eq)
        .sum();
    let inequality: f64 = inequalities
        .iter()
        .zip(inequality_penalties)
        .map(|(&ineq, r)| r * ineq.min(0.0) * ineq)
        .sum();
    objective + equality + inequality
}
