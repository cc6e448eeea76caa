//! Command-line interface definitions for the `scalevol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `scalevol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "scalevol",
    about = "Provision volumes backed by a clustered filesystem",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log filter used when `RUST_LOG` is unset (for example `info` or
    /// `scalevol=debug`).
    #[arg(long, global = true, value_name = "FILTER", default_value = "warn")]
    pub(crate) log_level: String,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub(crate) log_json: bool,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Engine operations exposed by the binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Mount the default filesystem and prepare the volume database.
    #[command(name = "activate")]
    Activate,
    /// Create a volume, or import an existing fileset or directory.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Forget a volume, optionally deleting its fileset or directory.
    #[command(name = "remove")]
    Remove(RemoveCommand),
    /// Describe one volume.
    #[command(name = "get")]
    Get(VolumeName),
    /// Describe every volume of the backend.
    #[command(name = "list")]
    List,
    /// Link a volume and print its path.
    #[command(name = "attach")]
    Attach(VolumeName),
    /// Check that a volume is attached.
    #[command(name = "detach")]
    Detach(VolumeName),
}

/// Arguments for `scalevol create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Logical volume name. Names ending in `scalevol-db` are reserved for
    /// the bootstrap volume and are refused.
    pub(crate) name: String,
    /// Creation option as `key=value`; repeatable.
    ///
    /// Keys: type (fileset or lightweight), filesystem, fileset, directory,
    /// quota, uid, gid, inode-space and inode-limit.
    #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE")]
    pub(crate) options: Vec<String>,
}

/// Arguments for `scalevol remove`.
#[derive(Debug, Args)]
pub(crate) struct RemoveCommand {
    /// Logical volume name.
    pub(crate) name: String,
    /// Also delete the fileset or directory backing the volume.
    #[arg(long)]
    pub(crate) force: bool,
}

/// A single volume name argument.
#[derive(Debug, Args)]
pub(crate) struct VolumeName {
    /// Logical volume name.
    pub(crate) name: String,
}
