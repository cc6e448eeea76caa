//! Local-CLI and remote-shell transports.
//!
//! Both transports run the same `mm*` administration commands and parse the
//! same `-Y` output. They differ only in how a command is launched: locally
//! through `sudo`, or on a remote host through `ssh ... sudo`.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use tracing::{debug, info};

use super::{
    Connector, ConnectorError, ConnectorFuture, ConnectorKind, FilesetInfo, FilesetOptions, parse,
};
use crate::runner::{CommandOutput, CommandRunner};

/// SSH settings for the remote-shell transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Privilege escalation command run on the remote host.
    pub sudo_bin: String,
    /// Remote login user.
    pub user: String,
    /// Remote host name or address.
    pub host: String,
    /// Remote SSH port.
    pub port: u16,
}

/// Where cluster commands are executed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShellTarget {
    /// Run on this host with elevated privilege.
    Local {
        /// Privilege escalation command.
        sudo_bin: String,
    },
    /// Run on a remote host over SSH.
    Remote(SshTarget),
}

/// Connector that shells out to the cluster administration commands.
#[derive(Clone, Debug)]
pub struct ShellConnector<R: CommandRunner> {
    runner: R,
    target: ShellTarget,
    mm_bin_dir: Utf8PathBuf,
    node_name: String,
}

impl<R: CommandRunner> ShellConnector<R> {
    /// Creates a connector running commands from `mm_bin_dir` on `target`.
    /// `node_name` identifies the local node in mount listings.
    #[must_use]
    pub fn new(
        runner: R,
        target: ShellTarget,
        mm_bin_dir: impl AsRef<Utf8Path>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            target,
            mm_bin_dir: mm_bin_dir.as_ref().to_path_buf(),
            node_name: node_name.into(),
        }
    }

    /// Returns the underlying runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    fn command_path(&self, command: &str) -> String {
        self.mm_bin_dir.join(command).into_string()
    }

    fn invocation(&self, command: &str, args: &[&str]) -> (String, Vec<OsString>) {
        let command_path = self.command_path(command);
        match &self.target {
            ShellTarget::Local { sudo_bin } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(OsString::from(command_path));
                argv.extend(args.iter().map(OsString::from));
                (sudo_bin.clone(), argv)
            }
            ShellTarget::Remote(ssh) => {
                let mut remote = String::from(escape(ssh.sudo_bin.as_str().into()));
                remote.push(' ');
                remote.push_str(&escape(command_path.as_str().into()));
                for arg in args {
                    remote.push(' ');
                    remote.push_str(&escape((*arg).into()));
                }
                let argv = vec![
                    OsString::from("-p"),
                    OsString::from(ssh.port.to_string()),
                    OsString::from("-o"),
                    OsString::from("BatchMode=yes"),
                    OsString::from(format!("{}@{}", ssh.user, ssh.host)),
                    OsString::from(remote),
                ];
                (ssh.ssh_bin.clone(), argv)
            }
        }
    }

    fn execute(&self, command: &str, args: &[&str]) -> Result<CommandOutput, ConnectorError> {
        let (program, argv) = self.invocation(command, args);
        debug!(command = %super::render_args(&program, &argv), "running cluster command");
        let output = self.runner.run(&program, &argv)?;
        if !output.is_success() {
            return Err(ConnectorError::CommandFailure {
                program: command.to_owned(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output)
    }

    fn cluster_id(&self) -> Result<String, ConnectorError> {
        let output = self.execute("mmlscluster", &[])?;
        parse::cluster_id(&output.stdout)
    }

    fn mounted(&self, filesystem: &str) -> Result<bool, ConnectorError> {
        let output = self.execute("mmlsmount", &[filesystem, "-L", "-Y"])?;
        let nodes = parse::mounted_nodes(&output.stdout)?;
        Ok(nodes.iter().any(|node| *node == self.node_name))
    }

    fn mount(&self, filesystem: &str) -> Result<(), ConnectorError> {
        if self.mounted(filesystem)? {
            debug!(filesystem, "filesystem already mounted");
            return Ok(());
        }
        self.execute("mmmount", &[filesystem])?;
        info!(filesystem, node = %self.node_name, "mounted filesystem");
        Ok(())
    }

    fn mountpoint(&self, filesystem: &str) -> Result<Utf8PathBuf, ConnectorError> {
        let output = self.execute("mmlsfs", &["all", "-T", "-Y"])?;
        parse::filesystem_mountpoints(&output.stdout)?
            .into_iter()
            .find(|(name, _)| name == filesystem)
            .map(|(_, path)| path)
            .ok_or_else(|| ConnectorError::not_found("filesystem", filesystem))
    }

    fn create(
        &self,
        filesystem: &str,
        fileset: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError> {
        let mut args = vec![filesystem, fileset];
        if let Some(space) = options.inode_space.as_deref() {
            args.extend(["--inode-space", space]);
        }
        if let Some(limit) = options.inode_limit.as_deref() {
            args.extend(["--inode-limit", limit]);
        }
        self.execute("mmcrfileset", &args)?;
        Ok(())
    }

    fn link(&self, filesystem: &str, fileset: &str) -> Result<(), ConnectorError> {
        let junction = self.mountpoint(filesystem)?.join(fileset);
        self.execute("mmlinkfileset", &[filesystem, fileset, "-J", junction.as_str()])?;
        Ok(())
    }

    fn fileset(&self, filesystem: &str, fileset: &str) -> Result<FilesetInfo, ConnectorError> {
        let output = self.execute("mmlsfileset", &[filesystem, fileset, "-Y"])?;
        parse::fileset(&output.stdout)
    }

    fn quota(&self, filesystem: &str, fileset: &str) -> Result<String, ConnectorError> {
        let output = self.execute(
            "mmlsquota",
            &["-j", fileset, filesystem, "--block-size", "auto"],
        )?;
        parse::fileset_quota(&output.stdout)
    }

    fn set_quota(&self, filesystem: &str, fileset: &str, quota: &str) -> Result<(), ConnectorError> {
        let target = format!("{filesystem}:{fileset}");
        let limits = format!("{quota}:{quota}");
        self.execute("mmsetquota", &[target.as_str(), "--block", limits.as_str()])?;
        Ok(())
    }
}

impl<R: CommandRunner> Connector for ShellConnector<R> {
    fn kind(&self) -> ConnectorKind {
        match self.target {
            ShellTarget::Local { .. } => ConnectorKind::LocalCli,
            ShellTarget::Remote(_) => ConnectorKind::RemoteShell,
        }
    }

    fn get_cluster_id(&self) -> ConnectorFuture<'_, String> {
        Box::pin(async move { self.cluster_id() })
    }

    fn is_filesystem_mounted<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move { self.mounted(filesystem) })
    }

    fn mount_filesystem<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.mount(filesystem) })
    }

    fn get_filesystem_mountpoint<'a>(
        &'a self,
        filesystem: &'a str,
    ) -> ConnectorFuture<'a, Utf8PathBuf> {
        Box::pin(async move { self.mountpoint(filesystem) })
    }

    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.create(filesystem, fileset, options) })
    }

    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.execute("mmdelfileset", &[filesystem, fileset, "-f"])?;
            Ok(())
        })
    }

    fn link_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.link(filesystem, fileset) })
    }

    fn unlink_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.execute("mmunlinkfileset", &[filesystem, fileset])?;
            Ok(())
        })
    }

    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, FilesetInfo> {
        Box::pin(async move { self.fileset(filesystem, fileset) })
    }

    fn list_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, String> {
        Box::pin(async move { self.quota(filesystem, fileset) })
    }

    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        quota: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.set_quota(filesystem, fileset, quota) })
    }
}
