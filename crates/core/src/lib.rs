//! Core traits and types for the FADO evaluation drivers.
//!
//! This crate defines what the drivers schedule and evaluate:
//!
//! - [`Variable`] and [`Parameter`], shared through [`VariableRef`] and
//!   [`ParameterRef`]
//! - [`EvaluationStep`], a pollable unit of work shared through [`StepRef`]
//! - [`Function`], a scalar of the design variables with value and gradient
//!   step chains, shared through [`FunctionRef`]
//! - [`VariableMask`], the layout of variables in the flat design vector
//! - [`Observer`], which receives driver events and optionally returns actions
//!
//! It also ships generic collaborators: [`CommandStep`] runs an external
//! program, [`TableReader`] parses its text output, and [`ChainFunction`]
//! ties the two together.

pub mod function;
mod mask;
mod observer;
mod parameter;
pub mod reader;
pub mod step;
mod variable;

pub use function::{ChainFunction, Function, FunctionError, FunctionRef};
pub use mask::VariableMask;
pub use observer::Observer;
pub use parameter::{Parameter, ParameterError, ParameterRef};
pub use reader::{ReadError, Reader, TableReader};
pub use step::{CommandStep, EvaluationStep, StepError, StepRef, StepState};
pub use variable::{Series, Variable, VariableError, VariableRef};
