//! Error types shared by every connector transport.

use thiserror::Error;

use crate::runner::SpawnError;

/// Errors raised while talking to the filesystem cluster.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectorError {
    /// Raised when a cluster command cannot be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Raised when a cluster command exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Administration command that failed.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when an HTTP request cannot be completed.
    #[error("{method} {path} failed: {message}")]
    Http {
        /// HTTP method of the failed request.
        method: String,
        /// Request path relative to the management endpoint.
        path: String,
        /// Client error message.
        message: String,
    },
    /// Raised when the management API answers with a non-success status.
    #[error("{operation} returned HTTP {status}: {body}")]
    HttpStatus {
        /// Connector operation being performed.
        operation: String,
        /// HTTP status code returned by the cluster.
        status: u16,
        /// Status payload returned by the cluster.
        body: String,
    },
    /// Raised when cluster output does not match the expected layout.
    #[error("cannot determine {what}: {detail}")]
    Parse {
        /// Value the connector was trying to extract.
        what: String,
        /// Description of the mismatch.
        detail: String,
    },
    /// Raised when a cluster resource is absent.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (for example `filesystem`).
        kind: String,
        /// Resource name.
        name: String,
    },
    /// Raised when an accepted asynchronous call carries no job descriptor.
    #[error("{operation} was accepted without a job descriptor")]
    MissingJob {
        /// Connector operation being performed.
        operation: String,
    },
    /// Raised when a job reaches a terminal status other than completed.
    #[error("job {job_id} finished with status {status}: {message}")]
    JobFailed {
        /// Identifier of the cluster job.
        job_id: u64,
        /// Terminal status reported by the cluster.
        status: String,
        /// Result payload reported with the job.
        message: String,
    },
    /// Raised when a job is still running once the poll deadline passes.
    #[error("job {job_id} still pending after {waited_secs}s")]
    JobPending {
        /// Identifier of the cluster job.
        job_id: u64,
        /// Seconds spent polling before giving up.
        waited_secs: u64,
    },
    /// Raised when the connector cannot be built from configuration.
    #[error("connector configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    pub(crate) fn parse(what: &str, detail: impl Into<String>) -> Self {
        Self::Parse {
            what: what.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }
    }
}
