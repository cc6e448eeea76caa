//! Asynchronous-job `scalemgmt/v2` transport.
//!
//! Reads are answered inline. Mutating calls are accepted with 200, 201 or
//! 202 and may carry job descriptors; the first job is polled to
//! completion. A 201 or 202 without any job is an error.

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::jobs::{JobPoller, JobsEnvelope};
use super::v1::id_text;
use super::{HttpRequest, HttpResponse, HttpTransport, segment};
use crate::connector::{
    Connector, ConnectorError, ConnectorFuture, ConnectorKind, FilesetInfo, FilesetOptions, parse,
};

const BASE: &str = "scalemgmt/v2";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterBody {
    cluster: ClusterRecord,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ClusterRecord {
    cluster_summary: ClusterSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ClusterSummary {
    cluster_id: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesystemsBody {
    filesystems: Vec<FilesystemRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesystemRecord {
    name: String,
    mount: MountRecord,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MountRecord {
    mount_point: String,
    nodes_mounted: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesetsBody {
    filesets: Vec<FilesetRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FilesetRecord {
    fileset_name: String,
    filesystem_name: String,
    config: FilesetConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesetConfig {
    id: Value,
    path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuotasBody {
    quotas: Vec<QuotaRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuotaRecord {
    object_name: String,
    block_quota: u64,
}

/// Connector for the asynchronous-job management API.
#[derive(Clone, Debug)]
pub struct RestV2Connector<T: HttpTransport> {
    transport: T,
    node_name: String,
    poller: JobPoller,
}

impl<T: HttpTransport> RestV2Connector<T> {
    /// Creates a connector; `node_name` identifies the local node in mount
    /// listings and `poller` bounds job waits.
    #[must_use]
    pub fn new(transport: T, node_name: impl Into<String>, poller: JobPoller) -> Self {
        Self {
            transport,
            node_name: node_name.into(),
            poller,
        }
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    async fn read(&self, operation: &str, path: String) -> Result<HttpResponse, ConnectorError> {
        self.transport
            .send(&HttpRequest::get(path))
            .await?
            .require_success(operation)
    }

    async fn submit(&self, operation: &str, request: HttpRequest) -> Result<(), ConnectorError> {
        let response = self.transport.send(&request).await?.require_success(operation)?;
        let envelope: JobsEnvelope = if response.body.trim().is_empty() {
            JobsEnvelope::default()
        } else {
            response.json(operation)?
        };

        match envelope.jobs.first() {
            Some(job) => {
                debug!(operation, job_id = job.job_id, "waiting for job");
                self.poller.wait(&self.transport, job.job_id).await
            }
            None if matches!(response.status, 201 | 202) => Err(ConnectorError::MissingJob {
                operation: operation.to_owned(),
            }),
            None => Ok(()),
        }
    }

    async fn cluster_id(&self) -> Result<String, ConnectorError> {
        let response = self.read("get cluster", format!("{BASE}/cluster")).await?;
        let body: ClusterBody = response.json("cluster id")?;
        id_text(&body.cluster.cluster_summary.cluster_id)
            .ok_or_else(|| ConnectorError::parse("cluster id", "cluster id is empty"))
    }

    async fn filesystem(&self, filesystem: &str) -> Result<FilesystemRecord, ConnectorError> {
        let path = format!("{BASE}/filesystems/{}?fields=:all:", segment(filesystem));
        let response = self.read("get filesystem", path).await?;
        let body: FilesystemsBody = response.json("filesystem")?;
        body.filesystems
            .into_iter()
            .find(|record| record.name == filesystem)
            .ok_or_else(|| ConnectorError::not_found("filesystem", filesystem))
    }

    async fn mounted(&self, filesystem: &str) -> Result<bool, ConnectorError> {
        let record = self.filesystem(filesystem).await?;
        Ok(record.mount.nodes_mounted.iter().any(|node| *node == self.node_name))
    }

    async fn mount(&self, filesystem: &str) -> Result<(), ConnectorError> {
        if self.mounted(filesystem).await? {
            return Ok(());
        }
        let path = format!("{BASE}/filesystems/{}/mount", segment(filesystem));
        self.submit(
            "mount filesystem",
            HttpRequest::put(path, Some(json!({ "nodes": [self.node_name] }))),
        )
        .await?;
        info!(filesystem, node = %self.node_name, "mounted filesystem");
        Ok(())
    }

    async fn mountpoint(&self, filesystem: &str) -> Result<Utf8PathBuf, ConnectorError> {
        let record = self.filesystem(filesystem).await?;
        let mount_point = record.mount.mount_point.trim();
        if mount_point.is_empty() {
            return Err(ConnectorError::parse(
                "filesystem mountpoint",
                format!("{filesystem} reports no mount point"),
            ));
        }
        Ok(Utf8PathBuf::from(mount_point))
    }

    fn filesets_path(filesystem: &str) -> String {
        format!("{BASE}/filesystems/{}/filesets", segment(filesystem))
    }

    fn fileset_path(filesystem: &str, fileset: &str) -> String {
        format!("{}/{}", Self::filesets_path(filesystem), segment(fileset))
    }

    async fn create(
        &self,
        filesystem: &str,
        fileset: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError> {
        let mut body = json!({ "filesetName": fileset });
        if let Some(space) = &options.inode_space {
            body["inodeSpace"] = Value::from(space.as_str());
        }
        if let Some(limit) = &options.inode_limit {
            body["maxNumInodes"] = Value::from(limit.as_str());
        }
        self.submit(
            "create fileset",
            HttpRequest::post(Self::filesets_path(filesystem), body),
        )
        .await
    }

    async fn link(&self, filesystem: &str, fileset: &str) -> Result<(), ConnectorError> {
        let junction = self.mountpoint(filesystem).await?.join(fileset);
        self.submit(
            "link fileset",
            HttpRequest::post(
                format!("{}/link", Self::fileset_path(filesystem, fileset)),
                json!({ "path": junction.as_str() }),
            ),
        )
        .await
    }

    async fn fileset(&self, filesystem: &str, fileset: &str) -> Result<FilesetInfo, ConnectorError> {
        let response = self
            .read("get fileset", Self::fileset_path(filesystem, fileset))
            .await?;
        let body: FilesetsBody = response.json("fileset")?;
        let record = body
            .filesets
            .into_iter()
            .find(|record| record.fileset_name == fileset)
            .ok_or_else(|| ConnectorError::not_found("fileset", fileset))?;
        Ok(FilesetInfo {
            id: id_text(&record.config.id).unwrap_or_default(),
            link_path: parse::link_path_from_report(&record.config.path),
            name: record.fileset_name,
            filesystem: record.filesystem_name,
        })
    }

    async fn quota(&self, filesystem: &str, fileset: &str) -> Result<String, ConnectorError> {
        let path = format!(
            "{BASE}/filesystems/{}/quotas?filter=objectName={},quotaType=FILESET",
            segment(filesystem),
            segment(fileset)
        );
        let response = self.read("list quota", path).await?;
        let body: QuotasBody = response.json("fileset quota")?;
        body.quotas
            .into_iter()
            .find(|record| record.object_name == fileset)
            .map(|record| format!("{}K", record.block_quota))
            .ok_or_else(|| ConnectorError::not_found("quota for fileset", fileset))
    }

    async fn set_quota(&self, filesystem: &str, fileset: &str, quota: &str) -> Result<(), ConnectorError> {
        let body = json!({
            "operationType": "setQuota",
            "quotaType": "fileset",
            "objectName": fileset,
            "blockSoftLimit": quota,
            "blockHardLimit": quota,
        });
        self.submit(
            "set quota",
            HttpRequest::post(format!("{BASE}/filesystems/{}/quotas", segment(filesystem)), body),
        )
        .await
    }
}

impl<T: HttpTransport> Connector for RestV2Connector<T> {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::RestV2
    }

    fn get_cluster_id(&self) -> ConnectorFuture<'_, String> {
        Box::pin(self.cluster_id())
    }

    fn is_filesystem_mounted<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, bool> {
        Box::pin(self.mounted(filesystem))
    }

    fn mount_filesystem<'a>(&'a self, filesystem: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(self.mount(filesystem))
    }

    fn get_filesystem_mountpoint<'a>(
        &'a self,
        filesystem: &'a str,
    ) -> ConnectorFuture<'a, Utf8PathBuf> {
        Box::pin(self.mountpoint(filesystem))
    }

    fn create_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        options: &'a FilesetOptions,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(self.create(filesystem, fileset, options))
    }

    fn delete_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(self.submit(
            "delete fileset",
            HttpRequest::delete(Self::fileset_path(filesystem, fileset)),
        ))
    }

    fn link_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(self.link(filesystem, fileset))
    }

    fn unlink_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(self.submit(
            "unlink fileset",
            HttpRequest::delete(format!("{}/link", Self::fileset_path(filesystem, fileset))),
        ))
    }

    fn list_fileset<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, FilesetInfo> {
        Box::pin(self.fileset(filesystem, fileset))
    }

    fn list_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
    ) -> ConnectorFuture<'a, String> {
        Box::pin(self.quota(filesystem, fileset))
    }

    fn set_fileset_quota<'a>(
        &'a self,
        filesystem: &'a str,
        fileset: &'a str,
        quota: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(self.set_quota(filesystem, fileset, quota))
    }
}
