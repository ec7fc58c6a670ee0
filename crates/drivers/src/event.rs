//! Events the drivers emit to their observer.

use std::time::Duration;

use crate::{FunctionRegistry, Kind};

/// Names of the registered functions, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub objectives: Vec<String>,
    pub equalities: Vec<String>,
    pub inequalities: Vec<String>,
    pub monitors: Vec<String>,

    /// Whether log rows carry penalty coefficients.
    pub penalties: bool,
}

impl Header {
    #[must_use]
    pub fn from_registry(registry: &FunctionRegistry, penalties: bool) -> Self {
        let names = |kind: Kind| -> Vec<String> {
            registry
                .of_kind(kind)
                .iter()
                .map(|entry| entry.function().name())
                .collect()
        };
        Self {
            objectives: names(Kind::Objective),
            equalities: names(Kind::Equality),
            inequalities: names(Kind::Inequality),
            monitors: names(Kind::Monitor),
            penalties,
        }
    }

    /// Every function name, in canonical order.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.objectives
            .iter()
            .chain(&self.equalities)
            .chain(&self.inequalities)
            .chain(&self.monitors)
            .map(String::as_str)
    }
}

/// Raw function values of one function pass.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    /// Number of function passes so far, this one included.
    pub index: usize,

    /// Raw values in canonical order.
    pub values: Vec<f64>,
}

/// Progress of the optimization after a gradient pass or penalty update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogRow {
    pub fun_evals: usize,
    pub grad_evals: usize,
    pub fun_time: Duration,
    pub grad_time: Duration,
    pub feasible: bool,

    /// Scaled objective values.
    pub objectives: Vec<f64>,

    /// Scaled equality values; zero when satisfied.
    pub equalities: Vec<f64>,

    /// Scaled inequality values; non-negative when satisfied.
    pub inequalities: Vec<f64>,

    /// Empty for drivers without penalties.
    pub equality_penalties: Vec<f64>,
    pub inequality_penalties: Vec<f64>,
}

/// Something that happened in a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The driver set itself up; sent once before anything else.
    Initialized { header: Header },

    /// A function pass completed.
    FunctionsEvaluated { record: HistoryRecord },

    /// A gradient pass completed.
    GradientEvaluated { row: LogRow },

    /// Penalty coefficients were updated.
    PenaltiesUpdated { row: LogRow },
}

/// What an observer may ask a driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Update the penalty coefficients now, as if the update period had
    /// elapsed. Only honored in response to [`Event::GradientEvaluated`] by
    /// drivers that have penalties.
    UpdatePenalties,
}
