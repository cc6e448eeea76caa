//! End-to-end engine flows over the asynchronous-job management API with a
//! scripted HTTP transport.

use std::time::Duration;

use camino::Utf8Path;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use scalevol::connector::{HttpMethod, JobPoller, RestV2Connector};
use scalevol::test_support::{FakeConnector, ScriptedTransport};
use scalevol::{
    BackendLock, EngineError, ProvisioningEngine, SqliteVolumeStore, VolumeDataModel,
    VolumeOptions, VolumeType,
};

const FILESYSTEM: &str =
    r#"{"filesystems":[{"name":"gpfs0","mount":{"mountPoint":"/gpfs/gpfs0","nodesMounted":["node1","node2"]}}]}"#;
const CLUSTER: &str = r#"{"cluster":{"clusterSummary":{"clusterId":7118073361626808055}}}"#;
const ACCEPTED: &str = r#"{"jobs":[{"jobId":42,"status":"RUNNING"}]}"#;

fn job(status: &str) -> String {
    format!(r#"{{"jobs":[{{"jobId":42,"status":"{status}"}}]}}"#)
}

struct Rest {
    engine: ProvisioningEngine,
    transport: ScriptedTransport,
    _dir: TempDir,
}

#[fixture]
fn rest() -> Rest {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8Path::from_path(dir.path()).expect("utf-8 tempdir");
    let transport = ScriptedTransport::new();
    let connector = RestV2Connector::new(
        transport.clone(),
        "node1",
        JobPoller::new(Duration::ZERO, Duration::from_secs(30)),
    );
    let engine = ProvisioningEngine::new(
        Box::new(connector),
        VolumeDataModel::new(SqliteVolumeStore::in_memory().expect("store"), "spectrum-scale"),
        BackendLock::new(root.join(".scalevol.lock")),
        "gpfs0",
    );
    Rest {
        engine,
        transport,
        _dir: dir,
    }
}

async fn activate(rest: &mut Rest) {
    rest.transport.push_json(200, FILESYSTEM);
    rest.transport.push_json(200, CLUSTER);
    rest.engine.activate().await.expect("activate");
}

#[rstest]
#[tokio::test]
async fn activation_skips_mount_when_the_node_has_it(mut rest: Rest) {
    activate(&mut rest).await;

    let requests = rest.transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|request| request.method == HttpMethod::Get));
    assert_eq!(rest.engine.model().cluster_id(), Some("7118073361626808055"));
}

#[rstest]
#[tokio::test]
async fn created_fileset_is_recorded_after_its_job_completes(mut rest: Rest) {
    activate(&mut rest).await;
    rest.transport.push_json(202, ACCEPTED);
    rest.transport.push_json(200, job("RUNNING"));
    rest.transport.push_json(200, job("COMPLETED"));

    let volume = rest
        .engine
        .create_volume("v1", &VolumeOptions::default())
        .await
        .expect("create");

    assert_eq!(volume.volume_type, VolumeType::Fileset);
    let polls = rest
        .transport
        .requests()
        .iter()
        .filter(|request| request.path.starts_with("scalemgmt/v2/jobs"))
        .count();
    assert_eq!(polls, 2);
}

#[rstest]
#[tokio::test]
async fn failed_job_leaves_no_row(mut rest: Rest) {
    activate(&mut rest).await;
    rest.transport.push_json(202, ACCEPTED);
    rest.transport.push_json(200, job("FAILED"));

    let err = rest
        .engine
        .create_volume("v1", &VolumeOptions::default())
        .await
        .expect_err("job failed");

    assert!(matches!(err, EngineError::Connector(_)));
    assert!(rest.engine.model().get("v1").expect("get").is_none());
}

#[rstest]
#[tokio::test]
async fn quota_and_rollback_failures_ask_for_manual_cleanup(mut rest: Rest) {
    activate(&mut rest).await;
    rest.transport.push_json(200, "");
    rest.transport.push_json(500, r#"{"status":{"code":500,"message":"quota rejected"}}"#);
    rest.transport.push_json(500, r#"{"status":{"code":500,"message":"busy"}}"#);
    let options = VolumeOptions::from_assignments(&["quota=1Gi"]).expect("options");

    let err = rest
        .engine
        .create_volume("v4", &options)
        .await
        .expect_err("manual cleanup");

    assert!(err.to_string().contains("manual cleanup required"));
    let deletes: Vec<_> = rest
        .transport
        .requests()
        .into_iter()
        .filter(|request| request.method == HttpMethod::Delete)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(
        deletes.first().map(|request| request.path.as_str()),
        Some("scalemgmt/v2/filesystems/gpfs0/filesets/v4")
    );
}

#[tokio::test]
async fn engines_sharing_a_lock_take_turns_on_one_runtime_thread() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8Path::from_path(dir.path()).expect("utf-8 tempdir");
    let lock_path = root.join(".scalevol.lock");

    let transport = ScriptedTransport::new();
    let mut writer = ProvisioningEngine::new(
        Box::new(RestV2Connector::new(
            transport.clone(),
            "node1",
            JobPoller::new(Duration::from_millis(20), Duration::from_secs(30)),
        )),
        VolumeDataModel::new(SqliteVolumeStore::in_memory().expect("store"), "spectrum-scale"),
        BackendLock::new(lock_path.clone()).with_retry_interval(Duration::from_millis(5)),
        "gpfs0",
    );
    transport.push_json(200, FILESYSTEM);
    transport.push_json(200, CLUSTER);
    writer.activate().await.expect("activate writer");

    let mountpoint = root.join("gpfs0");
    std::fs::create_dir_all(&mountpoint).expect("mountpoint");
    let mut reader = ProvisioningEngine::new(
        Box::new(FakeConnector::new("7118073361626808055").with_filesystem("gpfs0", &mountpoint, true)),
        VolumeDataModel::new(SqliteVolumeStore::in_memory().expect("store"), "spectrum-scale"),
        BackendLock::new(lock_path.clone()).with_retry_interval(Duration::from_millis(5)),
        "gpfs0",
    );
    reader.activate().await.expect("activate reader");

    transport.push_json(202, ACCEPTED);
    transport.push_json(200, job("RUNNING"));
    transport.push_json(200, job("RUNNING"));
    transport.push_json(200, job("COMPLETED"));

    let options = VolumeOptions::default();
    let (created, listed) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            writer.create_volume("v1", &options),
            reader.list_volumes(),
        )
    })
    .await
    .expect("both engines finish on a single runtime thread");

    assert_eq!(created.expect("create").volume_type, VolumeType::Fileset);
    assert!(listed.expect("list").is_empty());
}
