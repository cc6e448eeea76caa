//! Transport-polymorphic access to the clustered filesystem.
//!
//! Every transport implements [`Connector`] with the same contract. The
//! engine only ever sees a `Box<dyn Connector>` built by [`from_config`],
//! which picks the transport with [`ConnectorKind::select`].

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use tracing::info;

use crate::config::ScaleConfig;
use crate::runner::{CommandRunner, ProcessCommandRunner};

mod error;
pub(crate) mod parse;
pub mod rest;
pub mod shell;

pub use error::ConnectorError;
pub use rest::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, JobPoller, ReqwestTransport,
    RestV1Connector, RestV2Connector,
};
pub use shell::{ShellConnector, ShellTarget, SshTarget};

/// Boxed future returned by connector operations.
pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ConnectorError>> + Send + 'a>>;

/// Optional settings applied when a fileset is created.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FilesetOptions {
    /// Inode space to share (`new` allocates an independent inode space).
    pub inode_space: Option<String>,
    /// Maximum number of inodes for an independent fileset.
    pub inode_limit: Option<String>,
}

/// Fileset attributes reported by the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilesetInfo {
    /// Fileset name.
    pub name: String,
    /// Filesystem holding the fileset.
    pub filesystem: String,
    /// Numeric fileset identifier, kept as reported.
    pub id: String,
    /// Junction path when the fileset is linked.
    pub link_path: Option<String>,
}

impl FilesetInfo {
    /// Returns `true` when the cluster reported a usable junction path.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.link_path
            .as_deref()
            .is_some_and(|path| parse::link_path_from_report(path).is_some())
    }

    /// Returns the junction path when the fileset is linked.
    #[must_use]
    pub fn junction(&self) -> Option<Utf8PathBuf> {
        self.link_path
            .as_deref()
            .and_then(parse::link_path_from_report)
            .map(Utf8PathBuf::from)
    }
}

/// Operations every cluster transport supports.
pub trait Connector: Send + Sync {
    /// Transport backing this connector.
    fn kind(&self) -> ConnectorKind;

    /// Returns the non-empty cluster identifier.
    fn get_cluster_id(&self) -> ConnectorFuture<'_, String>;

    /// Returns whether `filesystem` is mounted on the local node.
    fn is_filesystem_mounted<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool>;

    /// Mounts `filesystem`; a no-op when it is already mounted locally.
    fn mount_filesystem<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, ()>;

    /// Returns the absolute default mount point of `filesystem`.
    fn get_filesystem_mountpoint<'a>(
        &'a self,
        filesystem: &'a str,
    ) -> ConnectorFuture<'a, Utf8PathBuf>;

    /// Creates a fileset.
    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()>;

    /// Deletes a fileset.
    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()>;

    /// Links a fileset at `{mountpoint}/{fileset}`.
    fn link_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()>;

    /// Unlinks a fileset.
    fn unlink_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()>;

    /// Describes a fileset. Absence is [`ConnectorError::NotFound`] or a
    /// transport failure, depending on how the cluster reports it.
    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, FilesetInfo>;

    /// Returns whether the fileset has a non-placeholder junction path.
    fn is_fileset_linked<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move { Ok(self.list_fileset(filesystem, fileset).await?.is_linked()) })
    }

    /// Returns the block quota token reported for the fileset.
    fn list_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, String>;

    /// Sets the block soft and hard limits of the fileset to `quota`.
    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        quota: &'a str,
    ) -> ConnectorFuture<'a, ()>;
}

/// Available cluster transports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectorKind {
    /// Administration commands run on this host through `sudo`.
    LocalCli,
    /// Administration commands run on a remote host over SSH.
    RemoteShell,
    /// Synchronous management API (`scalemgmt/v1`).
    RestV1,
    /// Asynchronous-job management API (`scalemgmt/v2`).
    RestV2,
}

impl ConnectorKind {
    /// Selects a transport from configuration. The asynchronous API wins over
    /// a remote host, which wins over the synchronous API. Without any of
    /// these the local CLI is used.
    #[must_use]
    pub fn select(config: &ScaleConfig) -> Self {
        if config.rest_v2_url().is_some() {
            Self::RestV2
        } else if config.remote_host().is_some() {
            Self::RemoteShell
        } else if config.rest_v1_url().is_some() {
            Self::RestV1
        } else {
            Self::LocalCli
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LocalCli => "local-cli",
            Self::RemoteShell => "remote-shell",
            Self::RestV1 => "rest-v1",
            Self::RestV2 => "rest-v2",
        };
        f.write_str(label)
    }
}

/// Returns the node name matched against mounted node lists: the configured
/// override, else the output of `hostname`.
///
/// # Errors
///
/// Returns [`ConnectorError`] when `hostname` cannot be run or prints
/// nothing.
pub fn resolve_node_name(
    config: &ScaleConfig,
    runner: &dyn CommandRunner,
) -> Result<String, ConnectorError> {
    if let Some(name) = config.node_name.as_deref().map(str::trim)
        && !name.is_empty()
    {
        return Ok(name.to_owned());
    }

    let output = runner.run("hostname", &[])?;
    if !output.is_success() {
        return Err(ConnectorError::CommandFailure {
            program: String::from("hostname"),
            status_text: output.status_text(),
            stderr: output.stderr,
        });
    }
    let name = output.stdout.trim();
    if name.is_empty() {
        return Err(ConnectorError::parse("local node name", "hostname printed nothing"));
    }
    Ok(name.to_owned())
}

/// Builds the connector selected by [`ConnectorKind::select`].
///
/// # Errors
///
/// Returns [`ConnectorError`] when the node name cannot be resolved or the
/// HTTP client cannot be built.
pub fn from_config(config: &ScaleConfig) -> Result<Box<dyn Connector>, ConnectorError> {
    let kind = ConnectorKind::select(config);
    let node_name = resolve_node_name(config, &ProcessCommandRunner)?;
    info!(%kind, node = %node_name, "selected cluster connector");

    let connector: Box<dyn Connector> = match kind {
        ConnectorKind::LocalCli => Box::new(ShellConnector::new(
            ProcessCommandRunner,
            ShellTarget::Local {
                sudo_bin: config.sudo_bin.clone(),
            },
            &config.mm_bin_dir,
            node_name,
        )),
        ConnectorKind::RemoteShell => {
            let (user, host) = config
                .remote_host()
                .ok_or_else(|| ConnectorError::Config(String::from("remote host is not configured")))?;
            Box::new(ShellConnector::new(
                ProcessCommandRunner,
                ShellTarget::Remote(SshTarget {
                    ssh_bin: config.ssh_bin.clone(),
                    sudo_bin: config.sudo_bin.clone(),
                    user: user.to_owned(),
                    host: host.to_owned(),
                    port: config.ssh_port,
                }),
                &config.mm_bin_dir,
                node_name,
            ))
        }
        ConnectorKind::RestV1 => {
            let endpoint = config.rest_v1_url().unwrap_or_default();
            let transport = ReqwestTransport::new(endpoint, credentials(config), config.rest_skip_tls_verify)?;
            Box::new(RestV1Connector::new(transport, node_name))
        }
        ConnectorKind::RestV2 => {
            let endpoint = config.rest_v2_url().unwrap_or_default();
            let transport = ReqwestTransport::new(endpoint, credentials(config), config.rest_skip_tls_verify)?;
            let poller = JobPoller::new(config.job_poll_interval(), config.job_wait_timeout());
            Box::new(RestV2Connector::new(transport, node_name, poller))
        }
    };
    Ok(connector)
}

fn credentials(config: &ScaleConfig) -> Option<(String, String)> {
    match (config.rest_user.as_deref(), config.rest_password.as_deref()) {
        (Some(user), Some(password)) if !user.trim().is_empty() => {
            Some((user.trim().to_owned(), password.to_owned()))
        }
        _ => None,
    }
}

/// Formats an argument list for logs and error messages.
pub(crate) fn render_args(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
