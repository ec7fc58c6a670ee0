//! The lazy evaluation core shared by every driver.

use std::{
    collections::HashMap,
    env, fmt, io,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use fado_core::{FunctionRef, Series, VariableMask};
use tracing::{debug, warn};

use crate::{
    ConfigError, DesignSpace, Direction, Error, FailureMode, FunctionRegistry, Storage, WorkDir,
    registry::Entry,
};

/// A user callback run inside the working directory around an evaluation
/// pass. It receives the path of the working directory.
pub type Hook = Box<dyn FnMut(&Path) -> io::Result<()>>;

/// When a [`Hook`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PreFunction,
    PostFunction,
    PreGradient,
    PostGradient,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreFunction => "pre-function",
            Self::PostFunction => "post-function",
            Self::PreGradient => "pre-gradient",
            Self::PostGradient => "post-gradient",
        })
    }
}

/// Builds a hook that runs an external command in the working directory.
///
/// The hook fails if the command cannot be started or exits unsuccessfully.
pub fn command_hook<I, S>(program: impl Into<String>, args: I) -> Hook
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let program = program.into();
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    Box::new(move |dir: &Path| -> io::Result<()> {
        let status = Command::new(&program).args(&args).current_dir(dir).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("`{program}` exited with {status}")))
        }
    })
}

/// Evaluation counts and the wall time spent in them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    fun_evals: usize,
    grad_evals: usize,
    fun_time: Duration,
    grad_time: Duration,
}

impl Counters {
    /// Number of completed function passes.
    #[must_use]
    pub fn fun_evals(&self) -> usize {
        self.fun_evals
    }

    /// Number of completed gradient passes.
    #[must_use]
    pub fn grad_evals(&self) -> usize {
        self.grad_evals
    }

    #[must_use]
    pub fn fun_time(&self) -> Duration {
        self.fun_time
    }

    #[must_use]
    pub fn grad_time(&self) -> Duration {
        self.grad_time
    }
}

/// Owns the registered functions and the current design point.
///
/// The core decides whether a design vector is new, pushes it into the
/// variables, resets the step chains and rotates the working directory. It
/// never evaluates anything by itself; see [`crate::EvalDriver`].
pub struct DriverBase {
    registry: FunctionRegistry,
    design: Option<DesignSpace>,
    workdir: Option<WorkDir>,
    storage: Storage,
    build_dir: Option<PathBuf>,
    failure_mode: FailureMode,
    x: Option<Vec<f64>>,
    fun_ready: bool,
    jac_ready: bool,
    counters: Counters,
    hooks: HashMap<Stage, Hook>,
}

impl Default for DriverBase {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBase {
    /// Creates an empty core. The process working directory at this point
    /// is the default user directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            design: None,
            workdir: None,
            storage: Storage::default(),
            build_dir: env::current_dir().ok(),
            failure_mode: FailureMode::default(),
            x: None,
            fun_ready: false,
            jac_ready: false,
            counters: Counters::default(),
            hooks: HashMap::new(),
        }
    }

    /// Sets where designs are evaluated; takes effect at the next
    /// [`DriverBase::preprocess_variables`].
    #[must_use]
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.set_storage(storage);
        self
    }

    pub fn set_storage(&mut self, storage: Storage) {
        self.storage = storage;
        self.design = None;
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn set_failure_mode(&mut self, mode: FailureMode) {
        self.failure_mode = mode;
    }

    #[must_use]
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Installs `hook` for `stage`, replacing any previous one.
    pub fn set_hook(&mut self, stage: Stage, hook: Hook) {
        self.hooks.insert(stage, hook);
    }

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
        self.registry.add_objective(direction, function, scale, weight)?;
        self.design = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive.
    pub fn add_equality(&mut self, function: &FunctionRef, target: f64, scale: f64) -> Result<(), ConfigError> {
        self.registry.add_equality(function, target, scale)?;
        self.design = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive.
    pub fn add_lower_bound(&mut self, function: &FunctionRef, bound: f64, scale: f64) -> Result<(), ConfigError> {
        self.registry.add_lower_bound(function, bound, scale)?;
        self.design = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `scale` is not finite and positive.
    pub fn add_upper_bound(&mut self, function: &FunctionRef, bound: f64, scale: f64) -> Result<(), ConfigError> {
        self.registry.add_upper_bound(function, bound, scale)?;
        self.design = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `lower` is not below `upper`.
    pub fn add_range(&mut self, function: &FunctionRef, lower: f64, upper: f64) -> Result<(), ConfigError> {
        self.registry.add_range(function, lower, upper)?;
        self.design = None;
        Ok(())
    }

    pub fn add_monitor(&mut self, function: &FunctionRef) {
        self.registry.add_monitor(function);
        self.design = None;
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Builds the design space and working directory from the registered
    /// functions.
    ///
    /// Any cached design point is dropped, so the next design vector is
    /// always treated as new.
    ///
    /// # Errors
    ///
    /// Returns an error if the user directory cannot be resolved.
    pub fn preprocess_variables(&mut self) -> Result<(), Error> {
        let design = DesignSpace::discover(&self.registry);
        let build_dir = match &self.build_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(Error::io("."))?,
        };
        self.workdir = Some(WorkDir::new(&self.storage, &build_dir));
        debug!(
            variables = design.variables().len(),
            size = design.len(),
            functions = self.registry.len(),
            "preprocessed variables"
        );
        self.design = Some(design);
        self.invalidate();
        Ok(())
    }

    #[must_use]
    pub fn is_preprocessed(&self) -> bool {
        self.design.is_some()
    }

    /// # Errors
    ///
    /// Returns [`Error::NotPreprocessed`] before
    /// [`DriverBase::preprocess_variables`] has run.
    pub fn design(&self) -> Result<&DesignSpace, Error> {
        self.design.as_ref().ok_or(Error::NotPreprocessed)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotPreprocessed`] before
    /// [`DriverBase::preprocess_variables`] has run.
    pub fn workdir(&self) -> Result<&WorkDir, Error> {
        self.workdir.as_ref().ok_or(Error::NotPreprocessed)
    }

    /// # Errors
    ///
    /// Returns an error if the variables have not been preprocessed.
    pub fn initial(&self) -> Result<Vec<f64>, Error> {
        Ok(self.design()?.series(Series::Initial))
    }

    /// # Errors
    ///
    /// Returns an error if the variables have not been preprocessed.
    pub fn lower_bound(&self) -> Result<Vec<f64>, Error> {
        Ok(self.design()?.series(Series::LowerBound))
    }

    /// # Errors
    ///
    /// Returns an error if the variables have not been preprocessed.
    pub fn upper_bound(&self) -> Result<Vec<f64>, Error> {
        Ok(self.design()?.series(Series::UpperBound))
    }

    /// # Errors
    ///
    /// Returns an error if the variables have not been preprocessed.
    pub fn num_variables(&self) -> Result<usize, Error> {
        Ok(self.design()?.len())
    }

    /// Makes `x` the current design point if it differs from the cached one.
    ///
    /// Returns `false` when every entry is within `f64::EPSILON` of the
    /// cached point. Otherwise the variables are updated, all chains are
    /// reset, the working directory is rotated (archived under the current
    /// function-evaluation count), and `true` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` has the wrong length, the variables have not
    /// been preprocessed, or the working directory cannot be rotated.
    pub fn handle_variable_change(&mut self, x: &[f64]) -> Result<bool, Error> {
        let design = self.design.as_ref().ok_or(Error::NotPreprocessed)?;
        if x.len() != design.len() {
            return Err(Error::DimensionMismatch {
                expected: design.len(),
                found: x.len(),
            });
        }

        let changed = self.x.as_ref().is_none_or(|cached| {
            cached
                .iter()
                .zip(x)
                .any(|(old, new)| (old - new).abs() > f64::EPSILON)
        });
        if !changed {
            return Ok(false);
        }

        design.apply(x)?;
        self.fun_ready = false;
        self.jac_ready = false;

        for entry in self.registry.entries() {
            let mut function = entry.function().borrow_mut();
            function.reset_value_chain();
            function.reset_gradient_chain();
        }

        self.workdir()?.rotate(self.counters.fun_evals)?;
        self.x = Some(x.to_vec());
        debug!(evaluations = self.counters.fun_evals, "new design point");
        Ok(true)
    }

    /// Forgets the cached design point so the next one is always new.
    pub fn invalidate(&mut self) {
        self.x = None;
        self.fun_ready = false;
        self.jac_ready = false;
    }

    /// The cached design point, if any.
    #[must_use]
    pub fn current_x(&self) -> Option<&[f64]> {
        self.x.as_deref()
    }

    #[must_use]
    pub fn fun_ready(&self) -> bool {
        self.fun_ready
    }

    #[must_use]
    pub fn jac_ready(&self) -> bool {
        self.jac_ready
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub(crate) fn finish_function_pass(&mut self, elapsed: Duration) {
        self.counters.fun_evals += 1;
        self.counters.fun_time += elapsed;
        self.fun_ready = true;
    }

    pub(crate) fn finish_gradient_pass(&mut self, elapsed: Duration) {
        self.counters.grad_evals += 1;
        self.counters.grad_time += elapsed;
        self.jac_ready = true;
    }

    /// Evaluates one registered function.
    ///
    /// In soft failure mode a failed function with a default value yields
    /// that default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Function`] if the evaluation fails and no fallback
    /// applies.
    pub fn value_of(&self, entry: &Entry) -> Result<f64, Error> {
        let result = entry.function().borrow_mut().value();
        let source = match result {
            Ok(value) => return Ok(value),
            Err(source) => source,
        };

        let name = entry.function().name();
        if self.failure_mode == FailureMode::Soft {
            if let Some(default) = entry.function().borrow().default_value() {
                warn!(function = %name, error = %source, default, "using default value");
                return Ok(default);
            }
        }
        Err(Error::Function { name, source })
    }

    /// Evaluates the gradient of one registered function, laid out by `mask`.
    ///
    /// In soft failure mode a failed gradient falls back to `previous`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gradient`] if the evaluation fails and no fallback
    /// applies.
    pub fn gradient_of(
        &self,
        entry: &Entry,
        mask: &VariableMask,
        previous: Option<&[f64]>,
    ) -> Result<Vec<f64>, Error> {
        let result = entry.function().borrow_mut().gradient(mask);
        let source = match result {
            Ok(gradient) => return Ok(gradient),
            Err(source) => source,
        };

        let name = entry.function().name();
        match (self.failure_mode, previous) {
            (FailureMode::Soft, Some(previous)) => {
                warn!(function = %name, error = %source, "using previous gradient");
                Ok(previous.to_vec())
            }
            _ => Err(Error::Gradient { name, source }),
        }
    }

    /// Runs the hook installed for `stage`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hook`] if the hook fails.
    pub fn run_hook(&mut self, stage: Stage) -> Result<(), Error> {
        let Some(hook) = self.hooks.get_mut(&stage) else {
            return Ok(());
        };
        let dir = self
            .workdir
            .as_ref()
            .ok_or(Error::NotPreprocessed)?
            .path()
            .to_path_buf();
        hook(&dir).map_err(|source| Error::Hook { stage, source })
    }
}

impl fmt::Debug for DriverBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverBase")
            .field("registry", &self.registry)
            .field("design", &self.design)
            .field("workdir", &self.workdir)
            .field("build_dir", &self.build_dir)
            .field("failure_mode", &self.failure_mode)
            .field("x", &self.x)
            .field("counters", &self.counters)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
