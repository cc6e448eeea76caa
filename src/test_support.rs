//! Scripted runners, transports and connectors for exercising the engine
//! without a cluster.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::connector::{
    Connector, ConnectorError, ConnectorFuture, ConnectorKind, FilesetInfo, FilesetOptions,
    HttpRequest, HttpResponse, HttpTransport,
};
use crate::runner::{CommandOutput, CommandRunner, SpawnError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Command runner that replays queued outputs instead of spawning `mm*`
/// commands, remembering every call it was asked to make.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// One call observed by [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program handed to the runner (`sudo`, `ssh`, or an `mm*` path).
    pub program: String,
    /// Full argument vector.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Program and arguments joined by single spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether any argument ends with `command`, e.g. `mmlinkfileset`.
    #[must_use]
    pub fn invokes(&self, command: &str) -> bool {
        self.program.ends_with(command)
            || self
                .args
                .iter()
                .any(|arg| arg.to_string_lossy().ends_with(command))
    }
}

impl ScriptedRunner {
    /// Runner with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Queues a zero exit with no output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Queues a non-zero exit carrying a canned stderr message.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Queues an arbitrary exit code and output pair.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| SpawnError::new(program, "no scripted response available"))
    }
}

/// Scripted HTTP transport that answers requests in FIFO order and records
/// every request it receives.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<HttpResponse>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response with the given status and body.
    pub fn push_json(&self, status: u16, body: impl Into<String>) {
        lock(&self.responses).push_back(HttpResponse {
            status,
            body: body.into(),
        });
    }

    /// Returns a snapshot of all requests sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send<'a>(&'a self, request: &'a HttpRequest) -> ConnectorFuture<'a, HttpResponse> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.responses).pop_front();
        Box::pin(async move {
            next.ok_or_else(|| ConnectorError::Http {
                method: request.method.as_str().to_owned(),
                path: request.path.clone(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// Fileset state held by [`FakeConnector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeFileset {
    /// Identifier assigned on creation.
    pub id: u32,
    /// Whether the fileset is linked under its filesystem mount point.
    pub linked: bool,
    /// Block quota token, if one was set.
    pub quota: Option<String>,
}

#[derive(Debug, Default)]
struct FakeCluster {
    cluster_id: String,
    mountpoints: BTreeMap<String, Utf8PathBuf>,
    mounted: BTreeSet<String>,
    filesets: BTreeMap<(String, String), FakeFileset>,
    next_id: u32,
    failing: BTreeSet<String>,
    calls: Vec<String>,
}

/// In-memory cluster implementing [`Connector`].
///
/// Every call is journaled as `operation arg...`. Operations registered with
/// [`FakeConnector::fail`] return a command failure. Linking a fileset
/// creates its junction directory on disk so directory-based volumes can be
/// exercised against a temporary mount point.
#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeCluster>>,
}

impl FakeConnector {
    /// Creates an empty cluster with the given identifier.
    #[must_use]
    pub fn new(cluster_id: impl Into<String>) -> Self {
        let connector = Self::default();
        lock(&connector.state).cluster_id = cluster_id.into();
        connector
    }

    /// Adds a filesystem mounted (or not) at `mountpoint`.
    #[must_use]
    pub fn with_filesystem(self, name: &str, mountpoint: &Utf8Path, mounted: bool) -> Self {
        {
            let mut state = lock(&self.state);
            state.mountpoints.insert(name.to_owned(), mountpoint.to_path_buf());
            if mounted {
                state.mounted.insert(name.to_owned());
            }
        }
        self
    }

    /// Adds an existing fileset without journaling a call.
    pub fn add_fileset(&self, filesystem: &str, fileset: &str, linked: bool, quota: Option<&str>) {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.filesets.insert(
            (filesystem.to_owned(), fileset.to_owned()),
            FakeFileset {
                id,
                linked,
                quota: quota.map(str::to_owned),
            },
        );
    }

    /// Makes every later call of `operation` fail.
    pub fn fail(&self, operation: &str) {
        lock(&self.state).failing.insert(operation.to_owned());
    }

    /// Lets `operation` succeed again after [`FakeConnector::fail`].
    pub fn recover(&self, operation: &str) {
        lock(&self.state).failing.remove(operation);
    }

    /// Returns the journal of calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Counts journaled calls of `operation`.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    /// Returns the state of a fileset, if it exists.
    #[must_use]
    pub fn fileset(&self, filesystem: &str, fileset: &str) -> Option<FakeFileset> {
        lock(&self.state)
            .filesets
            .get(&(filesystem.to_owned(), fileset.to_owned()))
            .cloned()
    }

    /// Returns whether `filesystem` is mounted.
    #[must_use]
    pub fn is_mounted(&self, filesystem: &str) -> bool {
        lock(&self.state).mounted.contains(filesystem)
    }

    fn record(&self, operation: &str, args: &[&str]) -> Result<MutexGuard<'_, FakeCluster>, ConnectorError> {
        let mut state = lock(&self.state);
        let mut entry = String::from(operation);
        for arg in args {
            entry.push(' ');
            entry.push_str(arg);
        }
        state.calls.push(entry);
        if state.failing.contains(operation) {
            return Err(ConnectorError::CommandFailure {
                program: operation.to_owned(),
                status_text: String::from("1"),
                stderr: String::from("injected failure"),
            });
        }
        Ok(state)
    }

    fn key(filesystem: &str, fileset: &str) -> (String, String) {
        (filesystem.to_owned(), fileset.to_owned())
    }

    fn mountpoint_of(state: &FakeCluster, filesystem: &str) -> Result<Utf8PathBuf, ConnectorError> {
        state
            .mountpoints
            .get(filesystem)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found("filesystem", filesystem))
    }

    fn fileset_mut<'s>(
        state: &'s mut FakeCluster,
        filesystem: &str,
        fileset: &str,
    ) -> Result<&'s mut FakeFileset, ConnectorError> {
        state
            .filesets
            .get_mut(&Self::key(filesystem, fileset))
            .ok_or_else(|| ConnectorError::not_found("fileset", fileset))
    }

    fn do_create(&self, filesystem: &str, fileset: &str) -> Result<(), ConnectorError> {
        let mut state = self.record("create_fileset", &[filesystem, fileset])?;
        Self::mountpoint_of(&state, filesystem)?;
        if state.filesets.contains_key(&Self::key(filesystem, fileset)) {
            return Err(ConnectorError::CommandFailure {
                program: String::from("create_fileset"),
                status_text: String::from("1"),
                stderr: format!("fileset {fileset} already exists"),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        state.filesets.insert(
            Self::key(filesystem, fileset),
            FakeFileset {
                id,
                linked: false,
                quota: None,
            },
        );
        Ok(())
    }

    fn do_link(&self, filesystem: &str, fileset: &str) -> Result<(), ConnectorError> {
        let mut state = self.record("link_fileset", &[filesystem, fileset])?;
        let junction = Self::mountpoint_of(&state, filesystem)?.join(fileset);
        Self::fileset_mut(&mut state, filesystem, fileset)?.linked = true;
        std::fs::create_dir_all(&junction).map_err(|err| ConnectorError::CommandFailure {
            program: String::from("link_fileset"),
            status_text: String::from("1"),
            stderr: err.to_string(),
        })
    }

    fn do_list(&self, filesystem: &str, fileset: &str) -> Result<FilesetInfo, ConnectorError> {
        let mut state = self.record("list_fileset", &[filesystem, fileset])?;
        let mountpoint = Self::mountpoint_of(&state, filesystem)?;
        let entry = Self::fileset_mut(&mut state, filesystem, fileset)?;
        Ok(FilesetInfo {
            name: fileset.to_owned(),
            filesystem: filesystem.to_owned(),
            id: entry.id.to_string(),
            link_path: entry
                .linked
                .then(|| mountpoint.join(fileset).into_string()),
        })
    }
}

impl Connector for FakeConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::LocalCli
    }

    fn get_cluster_id(&self) -> ConnectorFuture<'_, String> {
        Box::pin(async move {
            let state = self.record("get_cluster_id", &[])?;
            Ok(state.cluster_id.clone())
        })
    }

    fn is_filesystem_mounted<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            let state = self.record("is_filesystem_mounted", &[filesystem])?;
            Ok(state.mounted.contains(filesystem))
        })
    }

    fn mount_filesystem<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record("mount_filesystem", &[filesystem])?;
            Self::mountpoint_of(&state, filesystem)?;
            state.mounted.insert(filesystem.to_owned());
            Ok(())
        })
    }

    fn get_filesystem_mountpoint<'a>(
        &'a self,
        filesystem: &'a str,
    ) -> ConnectorFuture<'a, Utf8PathBuf> {
        Box::pin(async move {
            let state = self.record("get_filesystem_mountpoint", &[filesystem])?;
            Self::mountpoint_of(&state, filesystem)
        })
    }

    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        _options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.do_create(filesystem, fileset) })
    }

    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record("delete_fileset", &[filesystem, fileset])?;
            state
                .filesets
                .remove(&Self::key(filesystem, fileset))
                .map(|_| ())
                .ok_or_else(|| ConnectorError::not_found("fileset", fileset))
        })
    }

    fn link_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move { self.do_link(filesystem, fileset) })
    }

    fn unlink_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record("unlink_fileset", &[filesystem, fileset])?;
            Self::fileset_mut(&mut state, filesystem, fileset)?.linked = false;
            Ok(())
        })
    }

    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, FilesetInfo> {
        Box::pin(async move { self.do_list(filesystem, fileset) })
    }

    fn list_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.record("list_fileset_quota", &[filesystem, fileset])?;
            let entry = Self::fileset_mut(&mut state, filesystem, fileset)?;
            Ok(entry.quota.clone().unwrap_or_else(|| String::from("0")))
        })
    }

    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        quota: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record("set_fileset_quota", &[filesystem, fileset, quota])?;
            Self::fileset_mut(&mut state, filesystem, fileset)?.quota = Some(quota.to_owned());
            Ok(())
        })
    }
}
