use std::{
    fmt,
    path::{Component, Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

/// Errors that can occur when validating driver configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("scale of `{function}` must be finite and positive, got {scale}")]
    NonPositiveScale { function: String, scale: f64 },

    #[error("weight of `{function}` must be finite and positive, got {weight}")]
    NonPositiveWeight { function: String, weight: f64 },

    #[error("range of `{function}` is empty: lower {lower} is not below upper {upper}")]
    InvalidBounds {
        function: String,
        lower: f64,
        upper: f64,
    },

    #[error("`{function}`: {what} must be finite, got {value}")]
    NonFinite {
        function: String,
        what: &'static str,
        value: f64,
    },

    #[error("unknown failure mode `{0}`, expected HARD or SOFT")]
    UnknownFailureMode(String),

    #[error("parallel wait must be finite and non-negative, got {0}")]
    Wait(f64),

    #[error("tol must be finite and non-negative")]
    Tol,

    #[error("rini must be finite, positive and not above rmax")]
    Penalties,

    #[error("factor_up must be finite and at least 1")]
    FactorUp,

    #[error("factor_down must be in (0, 1]")]
    FactorDown,

    #[error("activation threshold must be finite")]
    Threshold,

    #[error("{what} `{name}` must be a single folder name inside the user directory")]
    FolderName { what: &'static str, name: String },
}

/// What to do when a function or gradient evaluation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureMode {
    /// Every failure is returned to the caller.
    #[default]
    Hard,

    /// Failed values fall back to the function's default value and failed
    /// gradients to the last successful gradient, when available.
    Soft,
}

impl FromStr for FailureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("hard") {
            Ok(Self::Hard)
        } else if s.eq_ignore_ascii_case("soft") {
            Ok(Self::Soft)
        } else {
            Err(ConfigError::UnknownFailureMode(s.to_owned()))
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hard => "HARD",
            Self::Soft => "SOFT",
        })
    }
}

/// How evaluation steps are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvaluationMode {
    /// Functions run their own chains when their value is requested.
    #[default]
    Sequential,

    /// All needed steps are started as soon as their dependencies finish and
    /// polled every `wait` until the whole graph has drained.
    Parallel { wait: Duration },
}

impl EvaluationMode {
    /// Parallel execution polling every `wait` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if `wait` is negative or non-finite.
    pub fn parallel(wait: f64) -> Result<Self, ConfigError> {
        if !wait.is_finite() || wait < 0.0 {
            return Err(ConfigError::Wait(wait));
        }
        Ok(Self::Parallel {
            wait: Duration::from_secs_f64(wait),
        })
    }

    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }
}

/// Where evaluations happen and what is kept of them.
///
/// Every design point is evaluated inside a working directory under the user
/// directory. When the point changes, the directory is either archived as
/// `<prefix><count>` or deleted.
/// The work directory name and the archive prefix are validated so that
/// every folder the drivers create, archive or delete stays directly under
/// the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "StorageFields"))]
pub struct Storage {
    user_dir: Option<PathBuf>,
    keep_designs: bool,
    prefix: String,
    work_dir: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            user_dir: None,
            keep_designs: true,
            prefix: "DSN_".into(),
            work_dir: "__WORKDIR__".into(),
        }
    }
}

impl Storage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory that holds the working directory and the archives.
    ///
    /// Defaults to the process working directory at the time the
    /// [`crate::DriverBase`] was created. A relative path is resolved
    /// against that same directory.
    #[must_use]
    pub fn user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn keep_designs(mut self, keep: bool) -> Self {
        self.keep_designs = keep;
        self
    }

    /// Sets the prefix of archived design folders.
    ///
    /// # Errors
    ///
    /// Returns an error unless `prefix` is a plain folder name.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        self.prefix = folder_name("archive prefix", prefix.into())?;
        Ok(self)
    }

    /// Sets the name of the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error unless `name` is a plain folder name.
    pub fn work_dir(mut self, name: impl Into<String>) -> Result<Self, ConfigError> {
        self.work_dir = folder_name("work directory", name.into())?;
        Ok(self)
    }

    #[must_use]
    pub fn user_dir_path(&self) -> Option<&PathBuf> {
        self.user_dir.as_ref()
    }

    #[must_use]
    pub fn keeps_designs(&self) -> bool {
        self.keep_designs
    }

    #[must_use]
    pub fn archive_prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn work_dir_name(&self) -> &str {
        &self.work_dir
    }
}

/// Accepts exactly one normal path component: not empty, not `.` or `..`,
/// and without separators.
fn folder_name(what: &'static str, name: String) -> Result<String, ConfigError> {
    let has_separator = name.contains(['/', '\\']);
    let mut components = Path::new(&name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single && !has_separator {
        Ok(name)
    } else {
        Err(ConfigError::FolderName { what, name })
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(default)]
struct StorageFields {
    user_dir: Option<PathBuf>,
    keep_designs: bool,
    prefix: String,
    work_dir: String,
}

#[cfg(feature = "serde")]
impl Default for StorageFields {
    fn default() -> Self {
        let storage = Storage::default();
        Self {
            user_dir: storage.user_dir,
            keep_designs: storage.keep_designs,
            prefix: storage.prefix,
            work_dir: storage.work_dir,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<StorageFields> for Storage {
    type Error = ConfigError;

    fn try_from(fields: StorageFields) -> Result<Self, Self::Error> {
        let storage = Self {
            user_dir: fields.user_dir,
            keep_designs: fields.keep_designs,
            ..Self::default()
        };
        storage.prefix(fields.prefix)?.work_dir(fields.work_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_mode_parses_case_insensitively() {
        assert_eq!("SOFT".parse::<FailureMode>(), Ok(FailureMode::Soft));
        assert_eq!("hard".parse::<FailureMode>(), Ok(FailureMode::Hard));
        assert_eq!(
            "lenient".parse::<FailureMode>(),
            Err(ConfigError::UnknownFailureMode("lenient".into()))
        );
        assert_eq!(FailureMode::Soft.to_string(), "SOFT");
    }

    #[test]
    fn parallel_wait_is_validated() {
        assert_eq!(
            EvaluationMode::parallel(0.25),
            Ok(EvaluationMode::Parallel {
                wait: Duration::from_millis(250)
            })
        );
        assert!(EvaluationMode::parallel(-1.0).is_err());
        assert!(EvaluationMode::parallel(f64::NAN).is_err());
        assert!(!EvaluationMode::default().is_parallel());
    }

    #[test]
    fn storage_defaults() {
        let storage = Storage::default();
        assert!(storage.keeps_designs());
        assert_eq!(storage.archive_prefix(), "DSN_");
        assert_eq!(storage.work_dir_name(), "__WORKDIR__");
        assert!(storage.user_dir_path().is_none());
    }

    #[test]
    fn folder_names_stay_inside_the_user_dir() {
        for name in ["", ".", "..", "a/b", "a\\b", "/abs", "run/"] {
            assert!(
                matches!(Storage::new().work_dir(name), Err(ConfigError::FolderName { .. })),
                "work dir {name:?}"
            );
            assert!(
                matches!(Storage::new().prefix(name), Err(ConfigError::FolderName { .. })),
                "prefix {name:?}"
            );
        }

        let storage = Storage::new().work_dir("RUN").unwrap().prefix("CASE_").unwrap();
        assert_eq!(storage.work_dir_name(), "RUN");
        assert_eq!(storage.archive_prefix(), "CASE_");
    }
}
