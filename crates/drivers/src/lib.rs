//! Lazy, graph-scheduled evaluation drivers for design optimization.
//!
//! An optimizer proposes design vectors; the drivers turn them into function
//! values and gradients, evaluating each design point at most once:
//!
//! - [`DriverBase`] registers functions by role, detects whether a design
//!   vector is new, and manages the working directory of each evaluation
//! - [`EvalDriver`] evaluates the functions, either sequentially or by
//!   polling a graph of shared [`fado_core::EvaluationStep`]s
//! - [`ExteriorPenaltyDriver`] folds constraints into a penalized objective
//!   with adaptive penalties
//! - [`ConstrainedDriver`] exposes objective and constraints separately for
//!   optimizers that handle constraints themselves
//!
//! Drivers report progress to an [`fado_core::Observer`] of [`Event`]s.

mod base;
mod config;
mod constrained;
mod design;
mod error;
mod eval;
pub mod event;
mod executor;
mod graph;
pub mod penalty;
pub mod registry;
mod workdir;

#[cfg(test)]
mod test_utils;

pub use base::{Counters, DriverBase, Hook, Stage, command_hook};
pub use config::{ConfigError, EvaluationMode, FailureMode, Storage};
pub use constrained::{ConstrainedDriver, ConstraintKind, GradientMode};
pub use design::DesignSpace;
pub use error::{Error, StepFailure};
pub use eval::EvalDriver;
pub use event::{Action, Event, Header, HistoryRecord, LogRow};
pub use executor::Executor;
pub use graph::EvaluationGraph;
pub use penalty::{ExteriorPenaltyDriver, PenaltyConfig};
pub use registry::{Direction, FunctionRegistry, Kind, Role};
pub use workdir::{CwdGuard, WorkDir};
