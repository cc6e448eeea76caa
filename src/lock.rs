//! Cross-process advisory lock serialising engine operations per backend.
//!
//! The lock is an exclusive OS file lock on `{config_path}/.scalevol.lock`.
//! It is held for as long as the returned [`LockGuard`] lives and released
//! when the guard drops, whichever path the operation leaves by. Waiting for
//! the lock never blocks a runtime thread: contended attempts sleep on the
//! tokio timer and try again.

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Pause between attempts on a contended lock.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Errors raised while taking the backend lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Raised when the lock file cannot be opened or locked.
    #[error("failed to lock {path}: {source}")]
    Io {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Advisory lock keyed by a file path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackendLock {
    path: Utf8PathBuf,
    retry_interval: Duration,
}

impl BackendLock {
    /// Creates a lock on `path`. Nothing is opened until the lock is taken.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Overrides the pause between attempts while another holder has the
    /// lock.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Waits until the lock is held exclusively.
    ///
    /// The wait yields to the runtime between attempts, so other engines on
    /// the same runtime, including the current holder, keep making progress.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] when the lock file cannot be opened or
    /// locked.
    pub async fn acquire(&self) -> Result<LockGuard, LockError> {
        let mut contended = false;
        loop {
            if let Some(guard) = self.try_acquire()? {
                debug!(path = %self.path, contended, "acquired backend lock");
                return Ok(guard);
            }
            if !contended {
                debug!(path = %self.path, "backend lock is held elsewhere; waiting");
                contended = true;
            }
            sleep(self.retry_interval).await;
        }
    }

    /// Takes the lock if no one else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] when the lock file cannot be opened or the
    /// lock call fails for a reason other than contention.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let file = self.open()?;
        match file.try_lock() {
            Ok(()) => Ok(Some(LockGuard {
                file,
                path: self.path.clone(),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(source)) => Err(self.io_error(source)),
        }
    }
}

/// Holds the backend lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: Utf8PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(path = %self.path, error = %err, "failed to release backend lock");
        } else {
            debug!(path = %self.path, "released backend lock");
        }
    }
}
