//! Errors raised by the provisioning engine.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::connector::ConnectorError;
use crate::lock::LockError;
use crate::model::ModelError;

use super::options::OptionsError;

/// Errors raised by [`super::ProvisioningEngine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Raised when a volume with the same name is already recorded.
    #[error("volume {name} already exists")]
    AlreadyExists {
        /// Volume name.
        name: String,
    },
    /// Raised when no volume with the name is recorded.
    #[error("volume {name} not found")]
    NotFound {
        /// Volume name.
        name: String,
    },
    /// Raised by detach when the volume's fileset is not linked.
    #[error("volume {name} is not attached")]
    NotAttached {
        /// Volume name.
        name: String,
    },
    /// Raised when the cluster reports an empty identifier.
    #[error("cluster reported an empty cluster id")]
    EmptyClusterId,
    /// Raised when an imported fileset's quota differs from the request.
    #[error("fileset {fileset} has quota {reported}, but {requested} was requested")]
    QuotaMismatch {
        /// Imported fileset.
        fileset: String,
        /// Quota in the request.
        requested: String,
        /// Quota reported by the cluster.
        reported: String,
    },
    /// Raised when an imported directory does not exist.
    #[error("directory {path} does not exist")]
    DirectoryMissing {
        /// Expected directory path.
        path: Utf8PathBuf,
    },
    /// Raised when a new lightweight directory would replace an existing one.
    #[error("directory {path} already exists")]
    DirectoryExists {
        /// Conflicting path.
        path: Utf8PathBuf,
    },
    /// Raised when a directory operation fails.
    #[error("directory operation on {path} failed: {source}")]
    Directory {
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when quota setting failed and deleting the new fileset failed
    /// as well, leaving a fileset behind.
    #[error(
        "manual cleanup required: fileset {fileset} in {filesystem} was created but setting its \
         quota failed ({quota_error}) and deleting it failed ({cleanup_error})"
    )]
    ManualCleanupRequired {
        /// Filesystem holding the orphaned fileset.
        filesystem: String,
        /// Orphaned fileset.
        fileset: String,
        /// Quota failure that triggered the rollback.
        quota_error: Box<ConnectorError>,
        /// Failure of the rollback delete.
        cleanup_error: Box<ConnectorError>,
    },
    /// Raised when the creation options are invalid.
    #[error(transparent)]
    Options(#[from] OptionsError),
    /// Raised when a cluster operation fails.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    /// Raised when the volume database fails.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Raised when the backend lock cannot be taken.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Raised when the configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn directory(path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }
}
