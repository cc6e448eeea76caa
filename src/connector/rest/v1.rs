//! Synchronous `scalemgmt/v1` transport: one HTTP call per operation.

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{HttpRequest, HttpResponse, HttpTransport, segment};
use crate::connector::{
    Connector, ConnectorError, ConnectorFuture, ConnectorKind, FilesetInfo, FilesetOptions, parse,
};

const BASE: &str = "scalemgmt/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterBody {
    cluster_id: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilesystemsBody {
    filesystems: Vec<FilesystemRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FilesystemRecord {
    name: String,
    mount_point: String,
    mounted_nodes: Vec<String>,
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
    block_quota: String,
}

/// Renders a JSON identifier that may arrive as a number or a string.
pub(super) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Connector for the synchronous management API.
#[derive(Clone, Debug)]
pub struct RestV1Connector<T: HttpTransport> {
    transport: T,
    node_name: String,
}

impl<T: HttpTransport> RestV1Connector<T> {
    /// Creates a connector; `node_name` identifies the local node in mount
    /// listings.
    #[must_use]
    pub fn new(transport: T, node_name: impl Into<String>) -> Self {
        Self {
            transport,
            node_name: node_name.into(),
        }
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(&self, operation: &str, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
        self.transport.send(&request).await?.require_success(operation)
    }

    async fn cluster_id(&self) -> Result<String, ConnectorError> {
        let response = self
            .call("get cluster", HttpRequest::get(format!("{BASE}/cluster")))
            .await?;
        let body: ClusterBody = response.json("cluster id")?;
        id_text(&body.cluster_id)
            .ok_or_else(|| ConnectorError::parse("cluster id", "cluster id is empty"))
    }

    async fn filesystem(&self, filesystem: &str) -> Result<FilesystemRecord, ConnectorError> {
        let response = self
            .call("list filesystems", HttpRequest::get(format!("{BASE}/filesystems")))
            .await?;
        let body: FilesystemsBody = response.json("filesystems")?;
        body.filesystems
            .into_iter()
            .find(|record| record.name == filesystem)
            .ok_or_else(|| ConnectorError::not_found("filesystem", filesystem))
    }

    async fn mounted(&self, filesystem: &str) -> Result<bool, ConnectorError> {
        let record = self.filesystem(filesystem).await?;
        Ok(record.mounted_nodes.iter().any(|node| *node == self.node_name))
    }

    async fn mount(&self, filesystem: &str) -> Result<(), ConnectorError> {
        if self.mounted(filesystem).await? {
            return Ok(());
        }
        let path = format!("{BASE}/filesystems/{}/mount", segment(filesystem));
        self.call(
            "mount filesystem",
            HttpRequest::put(path, Some(json!({ "nodes": [self.node_name] }))),
        )
        .await?;
        info!(filesystem, node = %self.node_name, "mounted filesystem");
        Ok(())
    }

    async fn mountpoint(&self, filesystem: &str) -> Result<Utf8PathBuf, ConnectorError> {
        let record = self.filesystem(filesystem).await?;
        if record.mount_point.trim().is_empty() {
            return Err(ConnectorError::parse(
                "filesystem mountpoint",
                format!("{filesystem} reports no mount point"),
            ));
        }
        Ok(Utf8PathBuf::from(record.mount_point.trim()))
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
        self.call(
            "create fileset",
            HttpRequest::post(Self::filesets_path(filesystem), body),
        )
        .await?;
        Ok(())
    }

    async fn link(&self, filesystem: &str, fileset: &str) -> Result<(), ConnectorError> {
        let junction = self.mountpoint(filesystem).await?.join(fileset);
        self.call(
            "link fileset",
            HttpRequest::put(
                format!("{}/link", Self::fileset_path(filesystem, fileset)),
                Some(json!({ "path": junction.as_str() })),
            ),
        )
        .await?;
        Ok(())
    }

    async fn fileset(&self, filesystem: &str, fileset: &str) -> Result<FilesetInfo, ConnectorError> {
        let response = self
            .call(
                "list fileset",
                HttpRequest::get(Self::fileset_path(filesystem, fileset)),
            )
            .await?;
        let body: FilesetsBody = response.json("fileset")?;
        let record = body
            .filesets
            .into_iter()
            .find(|record| record.fileset_name == fileset)
            .ok_or_else(|| ConnectorError::not_found("fileset", fileset))?;
        Ok(FilesetInfo {
            id: id_text(&record.id).unwrap_or_default(),
            link_path: parse::link_path_from_report(&record.path),
            name: record.fileset_name,
            filesystem: record.filesystem_name,
        })
    }

    async fn quota(&self, filesystem: &str, fileset: &str) -> Result<String, ConnectorError> {
        let path = format!(
            "{BASE}/filesystems/{}/quotas?filesetName={}",
            segment(filesystem),
            segment(fileset)
        );
        let response = self.call("list quota", HttpRequest::get(path)).await?;
        let body: QuotasBody = response.json("fileset quota")?;
        body.quotas
            .into_iter()
            .find(|record| record.object_name == fileset)
            .map(|record| record.block_quota)
            .ok_or_else(|| ConnectorError::not_found("quota for fileset", fileset))
    }

    async fn set_quota(&self, filesystem: &str, fileset: &str, quota: &str) -> Result<(), ConnectorError> {
        let body = json!({
            "objectName": fileset,
            "quotaType": "FILESET",
            "blockSoftLimit": quota,
            "blockHardLimit": quota,
        });
        self.call(
            "set quota",
            HttpRequest::post(format!("{BASE}/filesystems/{}/quotas", segment(filesystem)), body),
        )
        .await?;
        Ok(())
    }
}

impl<T: HttpTransport> Connector for RestV1Connector<T> {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::RestV1
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
        Box::pin(async move {
            self.call(
                "delete fileset",
                HttpRequest::delete(Self::fileset_path(filesystem, fileset)),
            )
            .await?;
            Ok(())
        })
    }

    fn link_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(self.link(filesystem, fileset))
    }

    fn unlink_fileset<'a>(&'a self, filesystem: &'a str, fileset: &'a str) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.call(
                "unlink fileset",
                HttpRequest::put(format!("{}/unlink", Self::fileset_path(filesystem, fileset)), None),
            )
            .await?;
            Ok(())
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::HttpMethod;
    use crate::test_support::ScriptedTransport;
    use rstest::{fixture, rstest};

    const FILESYSTEMS: &str = r#"{"filesystems":[{"name":"gpfs0","mountPoint":"/gpfs/gpfs0","mountedNodes":["node1","node2"]}]}"#;

    #[fixture]
    fn connector() -> RestV1Connector<ScriptedTransport> {
        RestV1Connector::new(ScriptedTransport::new(), "node1")
    }

    #[rstest]
    #[tokio::test]
    async fn cluster_id_accepts_numeric_ids(connector: RestV1Connector<ScriptedTransport>) {
        connector
            .transport()
            .push_json(200, r#"{"clusterId":7118073361626808055}"#);

        let id = connector.get_cluster_id().await.expect("cluster id");

        assert_eq!(id, "7118073361626808055");
    }

    #[rstest]
    #[tokio::test]
    async fn mount_is_skipped_when_node_listed(connector: RestV1Connector<ScriptedTransport>) {
        connector.transport().push_json(200, FILESYSTEMS);

        connector.mount_filesystem("gpfs0").await.expect("mount");

        assert_eq!(connector.transport().requests().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn link_puts_junction_under_mountpoint(connector: RestV1Connector<ScriptedTransport>) {
        connector.transport().push_json(200, FILESYSTEMS);
        connector.transport().push_json(200, "{}");

        connector.link_fileset("gpfs0", "vol1").await.expect("link");

        let requests = connector.transport().requests();
        let link = requests.last().expect("link request");
        assert_eq!(link.method, HttpMethod::Put);
        assert_eq!(link.path, "scalemgmt/v1/filesystems/gpfs0/filesets/vol1/link");
        assert_eq!(link.body, Some(json!({ "path": "/gpfs/gpfs0/vol1" })));
    }

    #[rstest]
    #[tokio::test]
    async fn non_success_status_is_reported_verbatim(
        connector: RestV1Connector<ScriptedTransport>,
    ) {
        connector
            .transport()
            .push_json(409, r#"{"status":{"message":"fileset exists"}}"#);

        let err = connector
            .create_fileset("gpfs0", "vol1", &FilesetOptions::default())
            .await
            .expect_err("conflict");

        assert_eq!(
            err,
            ConnectorError::HttpStatus {
                operation: String::from("create fileset"),
                status: 409,
                body: String::from(r#"{"status":{"message":"fileset exists"}}"#),
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn fileset_placeholder_path_is_unlinked(connector: RestV1Connector<ScriptedTransport>) {
        connector.transport().push_json(
            200,
            r#"{"filesets":[{"filesetName":"vol1","filesystemName":"gpfs0","id":7,"path":"--"}]}"#,
        );

        let info = connector.list_fileset("gpfs0", "vol1").await.expect("fileset");

        assert_eq!(info.id, "7");
        assert!(!info.is_linked());
    }
}
