//! Evaluation steps: the shareable units of work behind function values and
//! gradients.

mod command;

pub use command::CommandStep;

use std::{
    cell::{Ref, RefCell, RefMut},
    error::Error as StdError,
    fmt, io,
    hash::{Hash, Hasher},
    path::PathBuf,
    process::ExitStatus,
    rc::Rc,
    thread,
    time::Duration,
};

use thiserror::Error;

use crate::VariableRef;

/// Lifecycle of an [`EvaluationStep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StepState {
    #[default]
    Uninitialized,

    /// Started and waiting to be polled to completion.
    Polling,

    /// Finished successfully.
    Run,

    /// Finished with an error.
    Error,
}

/// Errors reported by evaluation steps.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("failed to launch `{program}`")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("step `{0}` ended in an error state")]
    Failed(String),

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl StepError {
    pub fn other<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

/// A unit of work feeding one or more functions.
///
/// Steps are driven by polling: [`EvaluationStep::initialize`] starts the
/// work and [`EvaluationStep::poll`] advances it without blocking. Polling a
/// finished step must be harmless.
pub trait EvaluationStep {
    fn name(&self) -> &str;

    fn state(&self) -> StepState;

    /// Starts the work.
    ///
    /// # Errors
    ///
    /// Returns an error if the work could not be started.
    fn initialize(&mut self) -> Result<(), StepError>;

    /// Advances the work and returns the resulting state.
    ///
    /// # Errors
    ///
    /// Returns an error if the work failed or its status could not be queried.
    fn poll(&mut self) -> Result<StepState, StepError>;

    /// Returns the step to [`StepState::Uninitialized`].
    fn reset(&mut self);

    /// Hands the step the variables it works with.
    fn update_variables(&mut self, _variables: &[VariableRef]) {}

    /// True once the step has been started, whether or not it finished.
    fn is_ini(&self) -> bool {
        self.state() != StepState::Uninitialized
    }

    fn is_run(&self) -> bool {
        self.state() == StepState::Run
    }

    fn is_error(&self) -> bool {
        self.state() == StepState::Error
    }

    fn is_done(&self) -> bool {
        matches!(self.state(), StepState::Run | StepState::Error)
    }
}

/// Runs a step to completion, blocking between polls.
///
/// A step that already finished is not started again.
///
/// # Errors
///
/// Returns an error if the step fails or ends in [`StepState::Error`].
pub fn drive(step: &mut dyn EvaluationStep, interval: Duration) -> Result<(), StepError> {
    match step.state() {
        StepState::Run => return Ok(()),
        StepState::Error => return Err(StepError::Failed(step.name().to_owned())),
        StepState::Uninitialized => step.initialize()?,
        StepState::Polling => {}
    }

    loop {
        match step.poll()? {
            StepState::Run => return Ok(()),
            StepState::Error => return Err(StepError::Failed(step.name().to_owned())),
            StepState::Uninitialized | StepState::Polling => thread::sleep(interval),
        }
    }
}

/// Shared handle to an [`EvaluationStep`].
///
/// Functions that share a step hold clones of the same handle; schedulers
/// deduplicate steps by the identity of the handle.
#[derive(Clone)]
pub struct StepRef(Rc<RefCell<dyn EvaluationStep>>);

impl StepRef {
    pub fn new<S: EvaluationStep + 'static>(step: S) -> Self {
        Self(Rc::new(RefCell::new(step)))
    }

    /// # Panics
    ///
    /// Panics if the step is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, dyn EvaluationStep + 'static> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the step is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, dyn EvaluationStep + 'static> {
        self.0.borrow_mut()
    }

    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.borrow().name().to_owned()
    }
}

/// Lets callers keep typed access to a step they also hand out.
impl<S: EvaluationStep + 'static> From<Rc<RefCell<S>>> for StepRef {
    fn from(step: Rc<RefCell<S>>) -> Self {
        Self(step)
    }
}

impl PartialEq for StepRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for StepRef {}

impl Hash for StepRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = self.borrow();
        f.debug_struct("StepRef")
            .field("name", &step.name())
            .field("state", &step.state())
            .finish()
    }
}
