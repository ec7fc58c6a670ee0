use std::{
    fmt::Write as _,
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use crate::VariableRef;

use super::{EvaluationStep, StepError, StepState};

/// An evaluation step that runs an external program in its own directory.
///
/// [`EvaluationStep::initialize`] creates the run directory, copies data
/// files into it, optionally writes the current design to a file, and spawns
/// the program with its output redirected to `log.txt`. The process is never
/// waited on; [`EvaluationStep::poll`] only checks whether it has exited.
///
/// Relative run directories resolve against the process working directory at
/// initialization, which the drivers point at the current design folder.
#[derive(Debug)]
pub struct CommandStep {
    name: String,
    dir: PathBuf,
    program: String,
    args: Vec<String>,
    data_files: Vec<PathBuf>,
    design_file: Option<String>,
    variables: Vec<VariableRef>,
    state: StepState,
    child: Option<Child>,
}

impl CommandStep {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            program: program.into(),
            args: Vec::new(),
            data_files: Vec::new(),
            design_file: None,
            variables: Vec::new(),
            state: StepState::Uninitialized,
            child: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Copies `path` into the run directory before every launch.
    #[must_use]
    pub fn data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_files.push(path.into());
        self
    }

    /// Writes the current variable values to `file_name` before every launch.
    ///
    /// One line per variable: its name followed by its unscaled values.
    #[must_use]
    pub fn design_file(mut self, file_name: impl Into<String>) -> Self {
        self.design_file = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.dir
    }

    fn prepare(&self) -> Result<(), StepError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StepError::Io { path, source }
        };

        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        for file in &self.data_files {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            fs::copy(file, self.dir.join(file_name)).map_err(io_err(file))?;
        }

        if let Some(design_file) = &self.design_file {
            let mut contents = String::new();
            for variable in &self.variables {
                let variable = variable.borrow();
                contents.push_str(variable.name());
                for value in variable.current() {
                    let _ = write!(contents, " {value}");
                }
                contents.push('\n');
            }
            let path = self.dir.join(design_file);
            fs::write(&path, contents).map_err(io_err(&path))?;
        }

        Ok(())
    }

    fn spawn(&self) -> Result<Child, StepError> {
        let log_path = self.dir.join("log.txt");
        let log = File::create(&log_path).map_err(|source| StepError::Io {
            path: log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| StepError::Io {
            path: log_path,
            source,
        })?;

        Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(|source| StepError::Launch {
                program: self.program.clone(),
                source,
            })
    }
}

impl EvaluationStep for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> StepState {
        self.state
    }

    fn initialize(&mut self) -> Result<(), StepError> {
        if self.state != StepState::Uninitialized {
            return Ok(());
        }

        let started = self.prepare().and_then(|()| self.spawn());
        match started {
            Ok(child) => {
                self.child = Some(child);
                self.state = StepState::Polling;
                Ok(())
            }
            Err(err) => {
                self.state = StepState::Error;
                Err(err)
            }
        }
    }

    fn poll(&mut self) -> Result<StepState, StepError> {
        if self.state != StepState::Polling {
            return Ok(self.state);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(self.state);
        };

        match child.try_wait() {
            Ok(None) => Ok(self.state),
            Ok(Some(status)) => {
                self.child = None;
                if status.success() {
                    self.state = StepState::Run;
                    Ok(self.state)
                } else {
                    self.state = StepState::Error;
                    Err(StepError::Exit {
                        program: self.program.clone(),
                        status,
                    })
                }
            }
            Err(source) => {
                self.state = StepState::Error;
                Err(StepError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        }
    }

    fn reset(&mut self) {
        if let Some(mut child) = self.child.take() {
            // A still-running process belongs to a design point that is gone.
            let _ = child.kill();
            let _ = child.wait();
        }
        self.state = StepState::Uninitialized;
    }

    fn update_variables(&mut self, variables: &[VariableRef]) {
        self.variables = variables.to_vec();
    }
}

impl Drop for CommandStep {
    fn drop(&mut self) {
        self.reset();
    }
}
