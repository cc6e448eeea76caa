//! Errors raised by the volume data model.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing volume rows.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Raised when the database file cannot be opened.
    #[error("failed to open volume database at {path}: {source}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Raised when a statement fails.
    #[error("volume database {operation} failed: {source}")]
    Store {
        /// Statement being executed.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Raised when a stored row cannot be decoded.
    #[error("volume row {name} is corrupt: {detail}")]
    CorruptRow {
        /// Volume name of the row.
        name: String,
        /// Description of the problem.
        detail: String,
    },
    /// Raised when a second bootstrap volume is recorded.
    #[error("bootstrap volume slot already holds {existing}; cannot record {requested}")]
    BootstrapOccupied {
        /// Volume currently held in the slot.
        existing: String,
        /// Volume that was being recorded.
        requested: String,
    },
}

impl ModelError {
    pub(crate) const fn store(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::Store { operation, source }
    }
}
