use std::{fmt, io, path::PathBuf};

use fado_core::{FunctionError, StepError, VariableError};
use thiserror::Error;

use crate::{ConfigError, Stage};

/// Errors returned by the drivers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error("design vector has {found} entries, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    /// One or more steps failed during a parallel pass.
    ///
    /// Reported after the whole graph has drained.
    #[error("Evaluations failed.")]
    Evaluations { failures: Vec<StepFailure> },

    #[error("evaluation of `{name}` failed")]
    Function {
        name: String,
        #[source]
        source: FunctionError,
    },

    #[error("gradient of `{name}` failed")]
    Gradient {
        name: String,
        #[source]
        source: FunctionError,
    },

    #[error("no gradient available for `{name}`")]
    MissingGradient { name: String },

    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{stage} hook failed")]
    Hook {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("step `{step}` is part of a dependency cycle")]
    CyclicDependency { step: String },

    #[error("variables have not been preprocessed")]
    NotPreprocessed,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// A step that failed during a parallel pass.
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub source: StepError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.source)
    }
}
