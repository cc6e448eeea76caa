//! Configuration loading via `ortho-config`.
//!
//! [`ScaleConfig`] merges defaults, `scalevol.toml`, and `SCALEVOL_*`
//! environment variables. The connector transport is chosen from which of
//! the optional endpoint groups are populated; see
//! [`crate::connector::ConnectorKind::select`].

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Backend identifier recorded on every volume row by default.
pub const DEFAULT_BACKEND: &str = "spectrum-scale";

/// Directory holding the cluster administration commands.
pub const DEFAULT_MM_BIN_DIR: &str = "/usr/lpp/mmfs/bin";

/// Base directory for the lock file and the volume database.
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/scalevol";

/// Cluster and connector settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCALEVOL",
    discovery(
        app_name = "scalevol",
        env_var = "SCALEVOL_CONFIG_FILE",
        config_file_name = "scalevol.toml",
        dotfile_name = ".scalevol.toml",
        project_file_name = "scalevol.toml"
    )
)]
pub struct ScaleConfig {
    /// Backend identifier stored alongside each volume name.
    #[ortho_config(default = DEFAULT_BACKEND.to_owned())]
    pub backend: String,
    /// Filesystem used when a request does not name one. Required.
    pub default_filesystem: String,
    /// Base configuration path. The advisory lock and the SQLite database
    /// live here.
    #[ortho_config(default = DEFAULT_CONFIG_PATH.to_owned())]
    pub config_path: String,
    /// Directory containing `mmlsfileset` and friends.
    #[ortho_config(default = DEFAULT_MM_BIN_DIR.to_owned())]
    pub mm_bin_dir: String,
    /// Privilege escalation command prefixed to every cluster command.
    #[ortho_config(default = "sudo".to_owned())]
    pub sudo_bin: String,
    /// Path to the `ssh` executable used by the remote-shell transport.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote login user. The remote-shell transport needs both user and
    /// host.
    pub ssh_user: Option<String>,
    /// Remote host running the cluster administration commands.
    pub ssh_host: Option<String>,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Base URL of the asynchronous-job management API
    /// (`https://gui.example.com:443/`).
    pub rest_endpoint: Option<String>,
    /// Management API user.
    pub rest_user: Option<String>,
    /// Management API password.
    pub rest_password: Option<String>,
    /// Base URL of the synchronous management API.
    pub rest_v1_endpoint: Option<String>,
    /// Accept self-signed management API certificates.
    #[ortho_config(default = false)]
    pub rest_skip_tls_verify: bool,
    /// Seconds between job status polls.
    #[ortho_config(default = 5)]
    pub job_poll_interval_secs: u64,
    /// Seconds to keep polling a running job before reporting it pending.
    #[ortho_config(default = 600)]
    pub job_wait_timeout_secs: u64,
    /// Overrides the local hostname matched against mounted node names.
    pub node_name: Option<String>,
    /// Default for `scalevol remove` when `--force` is not passed.
    #[ortho_config(default = false)]
    pub force_delete: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ScaleConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to scalevol.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn has_value(value: Option<&str>) -> bool {
        value.is_some_and(|v| !v.trim().is_empty())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("scalevol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.default_filesystem,
            &FieldMetadata::new(
                "default filesystem",
                "SCALEVOL_DEFAULT_FILESYSTEM",
                "default_filesystem",
            ),
        )?;
        Self::require_field(
            &self.backend,
            &FieldMetadata::new("backend identifier", "SCALEVOL_BACKEND", "backend"),
        )?;
        Self::require_field(
            &self.config_path,
            &FieldMetadata::new("config path", "SCALEVOL_CONFIG_PATH", "config_path"),
        )?;
        if self.ssh_port == 0 {
            return Err(ConfigError::Invalid(String::from("ssh_port must be non-zero")));
        }
        if self.job_wait_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "job_wait_timeout_secs must be non-zero",
            )));
        }
        if Self::has_value(self.rest_endpoint.as_deref()) {
            Self::require_field(
                self.rest_user.as_deref().unwrap_or_default(),
                &FieldMetadata::new("management API user", "SCALEVOL_REST_USER", "rest_user"),
            )?;
            Self::require_field(
                self.rest_password.as_deref().unwrap_or_default(),
                &FieldMetadata::new(
                    "management API password",
                    "SCALEVOL_REST_PASSWORD",
                    "rest_password",
                ),
            )?;
        }
        Ok(())
    }

    /// Returns the remote-shell `(user, host)` pair when both are set.
    #[must_use]
    pub fn remote_host(&self) -> Option<(&str, &str)> {
        match (self.ssh_user.as_deref(), self.ssh_host.as_deref()) {
            (Some(user), Some(host)) if !user.trim().is_empty() && !host.trim().is_empty() => {
                Some((user.trim(), host.trim()))
            }
            _ => None,
        }
    }

    /// Returns the asynchronous-job API endpoint when configured.
    #[must_use]
    pub fn rest_v2_url(&self) -> Option<&str> {
        self.rest_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// Returns the synchronous API endpoint when configured.
    #[must_use]
    pub fn rest_v1_url(&self) -> Option<&str> {
        self.rest_v1_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// Interval between job status polls.
    #[must_use]
    pub const fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    /// Deadline after which a running job is reported as pending.
    #[must_use]
    pub const fn job_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.job_wait_timeout_secs)
    }

    /// Path of the advisory lock file shared by every engine of this backend.
    #[must_use]
    pub fn lock_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config_path).join(".scalevol.lock")
    }

    /// Path of the SQLite database holding volume rows.
    #[must_use]
    pub fn database_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config_path).join("volumes.db")
    }

    /// Minimal configuration naming only the default filesystem and config
    /// path. Every connector option is left unset, which selects the local
    /// CLI transport.
    #[must_use]
    pub fn local(default_filesystem: impl Into<String>, config_path: impl Into<String>) -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_owned(),
            default_filesystem: default_filesystem.into(),
            config_path: config_path.into(),
            mm_bin_dir: DEFAULT_MM_BIN_DIR.to_owned(),
            sudo_bin: String::from("sudo"),
            ssh_bin: String::from("ssh"),
            ssh_user: None,
            ssh_host: None,
            ssh_port: 22,
            rest_endpoint: None,
            rest_user: None,
            rest_password: None,
            rest_v1_endpoint: None,
            rest_skip_tls_verify: false,
            job_poll_interval_secs: 5,
            job_wait_timeout_secs: 600,
            node_name: None,
            force_delete: false,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
