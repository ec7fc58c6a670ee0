use std::{
    env, fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{Error, Storage};

/// The working directory every design point is evaluated in.
///
/// All paths are absolute, so rotating the directory does not depend on
/// where the process happens to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    user_dir: PathBuf,
    path: PathBuf,
    prefix: String,
    keep_designs: bool,
}

impl WorkDir {
    /// Resolves the storage settings against `cwd`, the directory the
    /// driver was built in. It is the user directory when none is set and
    /// the base of a relative one.
    #[must_use]
    pub fn new(storage: &Storage, cwd: &Path) -> Self {
        let user_dir = match storage.user_dir_path() {
            Some(dir) => cwd.join(dir),
            None => cwd.to_path_buf(),
        };

        Self {
            path: user_dir.join(storage.work_dir_name()),
            user_dir,
            prefix: storage.archive_prefix().to_owned(),
            keep_designs: storage.keeps_designs(),
        }
    }

    #[must_use]
    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the design evaluated as pass `count` is archived.
    #[must_use]
    pub fn archive_path(&self, count: usize) -> PathBuf {
        self.user_dir.join(format!("{}{count:03}", self.prefix))
    }

    /// Retires the current working directory and creates an empty one.
    ///
    /// The process is moved to the user directory first and left there. The
    /// old directory is archived under `count` when designs are kept, replacing
    /// any archive of the same name, and deleted otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the directory operations fail.
    pub fn rotate(&self, count: usize) -> Result<(), Error> {
        env::set_current_dir(&self.user_dir).map_err(Error::io(&self.user_dir))?;

        if self.path.exists() {
            if self.keep_designs {
                let archive = self.archive_path(count);
                if archive.exists() {
                    fs::remove_dir_all(&archive).map_err(Error::io(&archive))?;
                }
                fs::rename(&self.path, &archive).map_err(Error::io(&archive))?;
                debug!(archive = %archive.display(), "archived design");
            } else {
                fs::remove_dir_all(&self.path).map_err(Error::io(&self.path))?;
            }
        }

        fs::create_dir_all(&self.path).map_err(Error::io(&self.path))
    }

    /// Moves the process into the working directory until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be entered.
    pub fn enter(&self) -> Result<CwdGuard, Error> {
        if !self.path.exists() {
            fs::create_dir_all(&self.path).map_err(Error::io(&self.path))?;
        }
        env::set_current_dir(&self.path).map_err(Error::io(&self.path))?;
        Ok(CwdGuard {
            user_dir: self.user_dir.clone(),
        })
    }
}

/// Returns the process to the user directory when dropped.
#[derive(Debug)]
#[must_use = "the working directory is left as soon as the guard drops"]
pub struct CwdGuard {
    user_dir: PathBuf,
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.user_dir) {
            warn!(dir = %self.user_dir.display(), %err, "failed to return to user directory");
        }
    }
}
