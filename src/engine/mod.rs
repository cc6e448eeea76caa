//! Provisioning engine: volume lifecycle over a connector and the data model.
//!
//! Every operation holds the backend lock for its whole duration, so at most
//! one engine operation runs per backend across cooperating processes. Rows
//! are written only after the connector sequence for a request succeeded.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ScaleConfig;
use crate::connector::{self, Connector, FilesetInfo, FilesetOptions};
use crate::lock::BackendLock;
use crate::model::{
    FilesystemVolume, SqliteVolumeStore, VolumeDataModel, VolumeStore, VolumeType,
    merge_permissions,
};

mod directory;
mod error;
mod options;
mod plan;

pub use error::EngineError;
pub use options::{OPTION_KEYS, OptionsError, RequestedType, VolumeOptions};
pub use plan::Plan;

/// Volume description returned by [`ProvisioningEngine::get_volume`] and
/// [`ProvisioningEngine::list_volumes`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeInfo {
    /// Logical volume name.
    pub name: String,
    /// Resource kind.
    pub volume_type: VolumeType,
    /// Path of the volume, present only while its fileset is linked.
    pub mountpoint: Option<Utf8PathBuf>,
    /// Cluster details: filesystem, fileset, fileset id, cluster id, owner
    /// and whether the resource was imported.
    pub config: BTreeMap<String, String>,
}

/// Orchestrates volume operations for one backend.
pub struct ProvisioningEngine<S: VolumeStore = SqliteVolumeStore> {
    connector: Box<dyn Connector>,
    model: VolumeDataModel<S>,
    lock: BackendLock,
    default_filesystem: String,
    activated: bool,
}

impl ProvisioningEngine<SqliteVolumeStore> {
    /// Builds an engine from configuration: validates it, creates the
    /// config directory, selects the connector and opens the database.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the configuration is invalid, the config
    /// directory cannot be created, the connector cannot be built or the
    /// database cannot be opened.
    pub fn from_config(config: &ScaleConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let config_dir = Utf8PathBuf::from(&config.config_path);
        std::fs::create_dir_all(&config_dir)
            .map_err(|err| EngineError::directory(&config_dir, err))?;

        let connector = connector::from_config(config)?;
        let store = SqliteVolumeStore::open(&config.database_path())?;
        let model = VolumeDataModel::new(store, config.backend.clone());
        Ok(Self::new(
            connector,
            model,
            BackendLock::new(config.lock_path()),
            config.default_filesystem.clone(),
        ))
    }
}

impl<S: VolumeStore> ProvisioningEngine<S> {
    /// Creates an engine in the uninitialised state.
    #[must_use]
    pub fn new(
        connector: Box<dyn Connector>,
        model: VolumeDataModel<S>,
        lock: BackendLock,
        default_filesystem: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            model,
            lock,
            default_filesystem: default_filesystem.into(),
            activated: false,
        }
    }

    /// Returns `true` once [`ProvisioningEngine::activate`] has succeeded.
    #[must_use]
    pub const fn is_activated(&self) -> bool {
        self.activated
    }

    /// Volume rows managed by this engine.
    #[must_use]
    pub const fn model(&self) -> &VolumeDataModel<S> {
        &self.model
    }

    /// Mounts the default filesystem when needed, records the cluster id and
    /// creates the volume table. A no-op once activated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyClusterId`] when the cluster reports no
    /// identifier, or any lock, connector or store error.
    pub async fn activate(&mut self) -> Result<(), EngineError> {
        let _guard = self.lock.acquire().await?;
        if self.activated {
            debug!("engine already activated");
            return Ok(());
        }

        let filesystem = self.default_filesystem.as_str();
        if self.connector.is_filesystem_mounted(filesystem).await? {
            debug!(filesystem, "filesystem already mounted");
        } else {
            info!(filesystem, "mounting filesystem");
            self.connector.mount_filesystem(filesystem).await?;
        }

        let cluster_id = self.connector.get_cluster_id().await?;
        if cluster_id.trim().is_empty() {
            return Err(EngineError::EmptyClusterId);
        }
        self.model.set_cluster_id(cluster_id.trim());
        self.model.ensure_table()?;
        self.activated = true;
        info!(
            cluster_id = cluster_id.trim(),
            backend = self.model.backend(),
            connector = %self.connector.kind(),
            "engine activated"
        );
        Ok(())
    }

    /// Provisions volume `name` as directed by `options` and records it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyExists`] when the name is taken,
    /// [`EngineError::Options`] for inconsistent options, and the error of
    /// the first failing connector or directory step. When a quota cannot be
    /// set and the new fileset cannot be deleted either, the error is
    /// [`EngineError::ManualCleanupRequired`].
    pub async fn create_volume(
        &mut self,
        name: &str,
        options: &VolumeOptions,
    ) -> Result<FilesystemVolume, EngineError> {
        let _guard = self.lock.acquire().await?;
        validate_name(name)?;
        if self.model.get(name)?.is_some() {
            return Err(EngineError::AlreadyExists {
                name: name.to_owned(),
            });
        }

        let plan = Plan::resolve(name, options, &self.default_filesystem)?;
        info!(
            volume = name,
            volume_type = %plan.volume_type(),
            import = plan.is_import(),
            filesystem = plan.filesystem(),
            fileset = plan.fileset(),
            "creating volume"
        );

        let mut volume = FilesystemVolume::new(
            name,
            plan.volume_type(),
            plan.filesystem(),
            plan.fileset(),
        );
        if let Some(directory) = plan.directory() {
            volume = volume.with_directory(directory);
        }
        if let Some(quota) = plan.quota() {
            volume = volume.with_quota(quota);
        }
        if plan.is_import() {
            volume = volume.preexisting();
        }
        merge_permissions(&mut volume, options.uid, options.gid);

        let new_directory = self.provision(&plan, &volume).await?;
        if let Err(err) = self.model.insert(volume.clone()) {
            if let Some(path) = new_directory {
                warn!(volume = name, error = %err, "recording volume failed; removing new directory");
                discard_directory(&path);
            }
            return Err(err.into());
        }
        info!(volume = name, "volume recorded");
        self.model
            .get(name)?
            .ok_or_else(|| EngineError::NotFound {
                name: name.to_owned(),
            })
    }

    /// Runs the connector and directory steps of `plan`. Returns the path of
    /// a directory created on the way, which the caller owns until the row
    /// is recorded.
    async fn provision(
        &self,
        plan: &Plan,
        volume: &FilesystemVolume,
    ) -> Result<Option<Utf8PathBuf>, EngineError> {
        match plan {
            Plan::CreateFileset {
                filesystem,
                fileset,
                inode,
            } => {
                self.connector.create_fileset(filesystem, fileset, inode).await?;
                Ok(None)
            }
            Plan::CreateFilesetQuota {
                filesystem,
                fileset,
                inode,
                quota,
            } => {
                self.create_with_quota(filesystem, fileset, inode, quota).await?;
                Ok(None)
            }
            Plan::ImportFileset {
                filesystem,
                fileset,
            } => {
                self.connector.list_fileset(filesystem, fileset).await?;
                Ok(None)
            }
            Plan::ImportFilesetQuota {
                filesystem,
                fileset,
                quota,
            } => {
                self.connector.list_fileset(filesystem, fileset).await?;
                let reported = self.connector.list_fileset_quota(filesystem, fileset).await?;
                if reported == *quota {
                    Ok(None)
                } else {
                    Err(EngineError::QuotaMismatch {
                        fileset: fileset.clone(),
                        requested: quota.clone(),
                        reported,
                    })
                }
            }
            Plan::CreateLightweight {
                filesystem,
                fileset,
                directory,
            } => {
                let junction = self.ensure_linked(filesystem, fileset).await?;
                let path = directory::create(&junction, directory)?;
                if let Some(owner) = volume.owner
                    && let Err(err) = directory::apply_owner(&path, owner)
                {
                    discard_directory(&path);
                    return Err(err);
                }
                Ok(Some(path))
            }
            Plan::ImportLightweight {
                filesystem,
                fileset,
                directory,
            } => {
                let junction = self.ensure_linked(filesystem, fileset).await?;
                if directory::exists(&junction, directory)? {
                    Ok(None)
                } else {
                    Err(EngineError::DirectoryMissing {
                        path: junction.join(directory),
                    })
                }
            }
        }
    }

    async fn create_with_quota(
        &self,
        filesystem: &str,
        fileset: &str,
        inode: &FilesetOptions,
        quota: &str,
    ) -> Result<(), EngineError> {
        self.connector.create_fileset(filesystem, fileset, inode).await?;
        let Err(quota_error) = self
            .connector
            .set_fileset_quota(filesystem, fileset, quota)
            .await
        else {
            return Ok(());
        };

        warn!(filesystem, fileset, error = %quota_error, "setting quota failed; deleting new fileset");
        if let Err(cleanup_error) = self.connector.delete_fileset(filesystem, fileset).await {
            warn!(filesystem, fileset, error = %cleanup_error, "rollback delete failed");
            return Err(EngineError::ManualCleanupRequired {
                filesystem: filesystem.to_owned(),
                fileset: fileset.to_owned(),
                quota_error: Box::new(quota_error),
                cleanup_error: Box::new(cleanup_error),
            });
        }
        Err(quota_error.into())
    }

    /// Links the fileset when it is not linked and returns its junction.
    async fn ensure_linked(
        &self,
        filesystem: &str,
        fileset: &str,
    ) -> Result<Utf8PathBuf, EngineError> {
        let info = self.connector.list_fileset(filesystem, fileset).await?;
        if let Some(junction) = info.junction() {
            return Ok(junction);
        }
        info!(filesystem, fileset, "linking fileset");
        self.connector.link_fileset(filesystem, fileset).await?;
        let mountpoint = self.connector.get_filesystem_mountpoint(filesystem).await?;
        Ok(mountpoint.join(fileset))
    }

    /// Forgets volume `name`. With `force` the fileset or directory backing
    /// it is deleted after the row is gone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the volume is not recorded, or
    /// any lock, connector, store or directory error.
    pub async fn remove_volume(&mut self, name: &str, force: bool) -> Result<(), EngineError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.require(name)?;
        let filesystem = volume.filesystem.as_str();
        let fileset = volume.fileset.as_str();
        info!(volume = name, force, volume_type = %volume.volume_type, "removing volume");

        if volume.volume_type.is_fileset() {
            if self.connector.is_fileset_linked(filesystem, fileset).await? {
                self.connector.unlink_fileset(filesystem, fileset).await?;
            }
            self.model.delete(name)?;
            if force {
                self.connector.delete_fileset(filesystem, fileset).await?;
                info!(filesystem, fileset, "deleted fileset");
            }
            return Ok(());
        }

        self.model.delete(name)?;
        if !force {
            return Ok(());
        }
        let directory = volume.directory.as_deref().unwrap_or(name);
        let junction = self
            .connector
            .get_filesystem_mountpoint(filesystem)
            .await?
            .join(fileset);
        directory::remove_tree(&junction, directory)?;
        info!(filesystem, fileset, directory, "deleted volume directory");
        Ok(())
    }

    /// Describes volume `name` with its live link state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the volume is not recorded, or
    /// any lock, connector or store error.
    pub async fn get_volume(&self, name: &str) -> Result<VolumeInfo, EngineError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.require(name)?;
        self.describe(volume).await
    }

    /// Describes every volume of the backend.
    ///
    /// # Errors
    ///
    /// Returns any lock, connector or store error.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, EngineError> {
        let _guard = self.lock.acquire().await?;
        let mut described = Vec::new();
        for volume in self.model.list_volumes()? {
            described.push(self.describe(volume).await?);
        }
        Ok(described)
    }

    async fn describe(&self, volume: FilesystemVolume) -> Result<VolumeInfo, EngineError> {
        let info = self
            .connector
            .list_fileset(&volume.filesystem, &volume.fileset)
            .await?;
        let mountpoint = volume_path(&volume, &info);
        Ok(VolumeInfo {
            config: volume_config(&volume, &info),
            name: volume.name,
            volume_type: volume.volume_type,
            mountpoint,
        })
    }

    /// Links the volume's fileset when needed and returns the volume path.
    /// Calling it again on an attached volume returns the same path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the volume is not recorded, or
    /// any lock, connector, store or directory error.
    pub async fn attach(&self, name: &str) -> Result<Utf8PathBuf, EngineError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.require(name)?;
        let junction = self.ensure_linked(&volume.filesystem, &volume.fileset).await?;
        let path = match volume.directory.as_deref() {
            Some(directory) if volume.volume_type == VolumeType::Lightweight => {
                junction.join(directory)
            }
            _ => junction,
        };
        if let Some(owner) = volume.owner {
            directory::apply_owner(&path, owner)?;
        }
        info!(volume = name, %path, "volume attached");
        Ok(path)
    }

    /// Checks that the volume is attached. The fileset stays linked.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotAttached`] when the fileset is not linked,
    /// [`EngineError::NotFound`] when the volume is not recorded, or any
    /// lock, connector or store error.
    pub async fn detach(&self, name: &str) -> Result<(), EngineError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.require(name)?;
        if !self
            .connector
            .is_fileset_linked(&volume.filesystem, &volume.fileset)
            .await?
        {
            return Err(EngineError::NotAttached {
                name: name.to_owned(),
            });
        }
        debug!(volume = name, "volume detached");
        Ok(())
    }

    fn require(&self, name: &str) -> Result<FilesystemVolume, EngineError> {
        self.model.get(name)?.ok_or_else(|| EngineError::NotFound {
            name: name.to_owned(),
        })
    }
}

fn validate_name(name: &str) -> Result<(), OptionsError> {
    let reason = if name.trim().is_empty() {
        "name is empty"
    } else if name.contains('/') || name == "." || name == ".." {
        "name must be a single path component"
    } else {
        return Ok(());
    };
    Err(OptionsError::InvalidValue {
        key: String::from("name"),
        value: name.to_owned(),
        reason: reason.to_owned(),
    })
}

/// Removes a directory created by a failed request. Failures are only logged.
fn discard_directory(path: &Utf8Path) {
    let (Some(junction), Some(name)) = (path.parent(), path.file_name()) else {
        return;
    };
    if let Err(err) = directory::remove_tree(junction, name) {
        warn!(%path, error = %err, "failed to remove new volume directory");
    }
}

fn volume_path(volume: &FilesystemVolume, info: &FilesetInfo) -> Option<Utf8PathBuf> {
    let junction = info.junction()?;
    match volume.directory.as_deref() {
        Some(directory) if volume.volume_type == VolumeType::Lightweight => {
            Some(junction.join(directory))
        }
        _ => Some(junction),
    }
}

fn volume_config(volume: &FilesystemVolume, info: &FilesetInfo) -> BTreeMap<String, String> {
    let mut config = BTreeMap::from([
        (String::from("filesystem"), volume.filesystem.clone()),
        (String::from("fileset"), volume.fileset.clone()),
        (String::from("fileset_id"), info.id.clone()),
        (String::from("cluster_id"), volume.cluster_id.clone()),
        (String::from("type"), volume.volume_type.to_string()),
        (
            String::from("is_preexisting"),
            volume.is_preexisting.to_string(),
        ),
    ]);
    if let Some(owner) = volume.owner {
        config.insert(String::from("uid"), owner.uid.to_string());
        config.insert(String::from("gid"), owner.gid.to_string());
    }
    if let Some(directory) = &volume.directory {
        config.insert(String::from("directory"), directory.clone());
    }
    if let Some(quota) = &volume.quota {
        config.insert(String::from("quota"), quota.clone());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeConnector;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        engine: ProvisioningEngine,
        cluster: FakeConnector,
        _dir: TempDir,
    }

    #[fixture]
    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = camino::Utf8Path::from_path(dir.path()).expect("utf-8 tempdir");
        let mountpoint = root.join("gpfs0");
        std::fs::create_dir_all(&mountpoint).expect("mountpoint");
        let cluster = FakeConnector::new("7118073361626808055").with_filesystem("gpfs0", &mountpoint, false);
        let store = SqliteVolumeStore::in_memory().expect("store");
        let engine = ProvisioningEngine::new(
            Box::new(cluster.clone()),
            VolumeDataModel::new(store, "spectrum-scale"),
            BackendLock::new(root.join(".scalevol.lock")),
            "gpfs0",
        );
        Harness {
            engine,
            cluster,
            _dir: dir,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn activate_runs_once(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;

        engine.activate().await.expect("first activate");
        engine.activate().await.expect("second activate");

        assert!(engine.is_activated());
        assert!(cluster.is_mounted("gpfs0"));
        assert_eq!(cluster.count("is_filesystem_mounted"), 1);
        assert_eq!(cluster.count("mount_filesystem"), 1);
        assert_eq!(cluster.count("get_cluster_id"), 1);
        assert_eq!(engine.model().cluster_id(), Some("7118073361626808055"));
    }

    #[tokio::test]
    async fn empty_cluster_id_fails_activation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = camino::Utf8Path::from_path(dir.path()).expect("utf-8 tempdir");
        let cluster = FakeConnector::new("  ").with_filesystem("gpfs0", &root.join("gpfs0"), true);
        let mut engine = ProvisioningEngine::new(
            Box::new(cluster),
            VolumeDataModel::new(SqliteVolumeStore::in_memory().expect("store"), "b"),
            BackendLock::new(root.join(".lock")),
            "gpfs0",
        );

        let err = engine.activate().await.expect_err("empty id");

        assert!(matches!(err, EngineError::EmptyClusterId));
        assert!(!engine.is_activated());
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_names_are_rejected(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;
        engine.activate().await.expect("activate");
        engine
            .create_volume("v1", &VolumeOptions::default())
            .await
            .expect("create");

        let err = engine
            .create_volume("v1", &VolumeOptions::default())
            .await
            .expect_err("duplicate");

        assert!(matches!(err, EngineError::AlreadyExists { .. }));
        assert_eq!(cluster.count("create_fileset"), 1);
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    #[tokio::test]
    async fn unusable_names_are_rejected(harness: Harness, #[case] name: &str) {
        let Harness {
            mut engine, cluster, ..
        } = harness;

        let err = engine
            .create_volume(name, &VolumeOptions::default())
            .await
            .expect_err("invalid name");

        assert!(matches!(err, EngineError::Options(OptionsError::InvalidValue { .. })));
        assert!(cluster.calls().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn quota_import_requires_matching_quota(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;
        engine.activate().await.expect("activate");
        cluster.add_fileset("gpfs0", "old", false, Some("5G"));
        let options =
            VolumeOptions::from_assignments(&["fileset=old", "filesystem=gpfs0", "quota=10G"])
                .expect("options");

        let err = engine.create_volume("v", &options).await.expect_err("mismatch");

        assert!(matches!(
            err,
            EngineError::QuotaMismatch { ref reported, .. } if reported == "5G"
        ));
        assert!(engine.model().get("v").expect("get").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn quota_failure_with_successful_rollback_returns_quota_error(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;
        engine.activate().await.expect("activate");
        cluster.fail("set_fileset_quota");
        let options = VolumeOptions::from_assignments(&["quota=1Gi"]).expect("options");

        let err = engine.create_volume("v4", &options).await.expect_err("quota failure");

        assert!(matches!(err, EngineError::Connector(_)));
        assert_eq!(cluster.count("delete_fileset"), 1);
        assert!(cluster.fileset("gpfs0", "v4").is_none());
        assert!(engine.model().get("v4").expect("get").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn remove_without_force_keeps_the_fileset(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;
        engine.activate().await.expect("activate");
        engine
            .create_volume("v1", &VolumeOptions::default())
            .await
            .expect("create");

        engine.remove_volume("v1", false).await.expect("remove");

        assert_eq!(cluster.count("delete_fileset"), 0);
        assert!(cluster.fileset("gpfs0", "v1").is_some());
        assert!(engine.model().get("v1").expect("get").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn detach_requires_a_linked_fileset(harness: Harness) {
        let Harness {
            mut engine, cluster, ..
        } = harness;
        engine.activate().await.expect("activate");
        engine
            .create_volume("v1", &VolumeOptions::default())
            .await
            .expect("create");

        let err = engine.detach("v1").await.expect_err("not attached");
        assert!(matches!(err, EngineError::NotAttached { .. }));

        engine.attach("v1").await.expect("attach");
        engine.detach("v1").await.expect("detach");
        assert!(cluster.fileset("gpfs0", "v1").expect("fileset").linked);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_volumes_are_not_found(harness: Harness) {
        let Harness { mut engine, .. } = harness;
        assert!(matches!(
            engine.get_volume("nope").await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.remove_volume("nope", true).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn config_reports_owner_only_when_set() {
        let mut volume = FilesystemVolume::new("v", VolumeType::Fileset, "gpfs0", "v");
        let info = FilesetInfo {
            name: String::from("v"),
            filesystem: String::from("gpfs0"),
            id: String::from("3"),
            link_path: None,
        };
        assert!(!volume_config(&volume, &info).contains_key("uid"));

        merge_permissions(&mut volume, Some(10), Some(20));
        let config = volume_config(&volume, &info);
        assert_eq!(config.get("uid").map(String::as_str), Some("10"));
        assert_eq!(config.get("gid").map(String::as_str), Some("20"));
        assert_eq!(config.get("fileset_id").map(String::as_str), Some("3"));
    }
}
