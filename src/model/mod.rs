//! Persistent mapping from logical volume names to cluster resources.
//!
//! Rows live in a [`VolumeStore`]. The one exception is the bootstrap
//! volume, whose storage holds the database itself: [`VolumeDataModel`]
//! keeps it in a single in-memory slot and never writes it to the store.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

mod error;
mod sqlite;

pub use error::ModelError;
pub use sqlite::SqliteVolumeStore;

/// Name suffix reserved for the bootstrap volume.
pub const BOOTSTRAP_VOLUME_SUFFIX: &str = "scalevol-db";

/// Kind of cluster resource backing a volume. Fixed at creation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeType {
    /// A dedicated fileset.
    Fileset,
    /// A directory inside an existing fileset.
    Lightweight,
    /// A dedicated fileset with a block quota.
    FilesetWithQuota,
}

impl VolumeType {
    /// Stable text form used in the database and in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fileset => "fileset",
            Self::Lightweight => "lightweight",
            Self::FilesetWithQuota => "fileset-quota",
        }
    }

    /// Returns `true` for the two fileset-backed kinds.
    #[must_use]
    pub const fn is_fileset(self) -> bool {
        matches!(self, Self::Fileset | Self::FilesetWithQuota)
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fileset" => Ok(Self::Fileset),
            "lightweight" => Ok(Self::Lightweight),
            "fileset-quota" => Ok(Self::FilesetWithQuota),
            other => Err(format!("unknown volume type {other}")),
        }
    }
}

/// Owner applied to a volume. uid and gid only ever travel together.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Ownership {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

/// A volume row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FilesystemVolume {
    /// Logical volume name, unique per backend.
    pub name: String,
    /// Backend identifier.
    pub backend: String,
    /// Resource kind.
    pub volume_type: VolumeType,
    /// Cluster identity active when the row was created.
    pub cluster_id: String,
    /// Filesystem holding the fileset.
    pub filesystem: String,
    /// Fileset backing the volume, or holding its directory.
    pub fileset: String,
    /// Directory inside the fileset (lightweight only).
    pub directory: Option<String>,
    /// Block quota token (quota volumes only).
    pub quota: Option<String>,
    /// Owner applied at creation.
    pub owner: Option<Ownership>,
    /// Whether the resource was imported rather than created.
    pub is_preexisting: bool,
}

impl FilesystemVolume {
    /// Creates a row for `name`. Backend and cluster id are stamped by
    /// [`VolumeDataModel::insert`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        volume_type: VolumeType,
        filesystem: impl Into<String>,
        fileset: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend: String::new(),
            volume_type,
            cluster_id: String::new(),
            filesystem: filesystem.into(),
            fileset: fileset.into(),
            directory: None,
            quota: None,
            owner: None,
            is_preexisting: false,
        }
    }

    /// Sets the lightweight directory.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Sets the quota token.
    #[must_use]
    pub fn with_quota(mut self, quota: impl Into<String>) -> Self {
        self.quota = Some(quota.into());
        self
    }

    /// Marks the row as an imported resource.
    #[must_use]
    pub const fn preexisting(mut self) -> Self {
        self.is_preexisting = true;
        self
    }
}

/// Where a volume row lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StorageSlot {
    /// The bootstrap volume, held only in memory.
    InMemorySingleSlot,
    /// A regular row keyed by volume name.
    PersistedRow(String),
}

impl StorageSlot {
    /// Routes `name` by the reserved bootstrap suffix.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        if name.ends_with(BOOTSTRAP_VOLUME_SUFFIX) {
            Self::InMemorySingleSlot
        } else {
            Self::PersistedRow(name.to_owned())
        }
    }
}

/// Row storage keyed by `(name, backend)`.
pub trait VolumeStore: Send + Sync {
    /// Creates the volume table when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the statement fails.
    fn ensure_table(&self) -> Result<(), ModelError>;

    /// Inserts a row.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the statement fails, including on a
    /// duplicate key.
    fn insert(&self, volume: &FilesystemVolume) -> Result<(), ModelError>;

    /// Fetches a row. A missing row is `Ok(None)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the query fails or the row is corrupt.
    fn get(&self, name: &str, backend: &str) -> Result<Option<FilesystemVolume>, ModelError>;

    /// Deletes a row, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the statement fails.
    fn delete(&self, name: &str, backend: &str) -> Result<bool, ModelError>;

    /// Lists the rows of a backend ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the query fails or a row is corrupt.
    fn list(&self, backend: &str) -> Result<Vec<FilesystemVolume>, ModelError>;
}

/// Volume rows of one backend, with the bootstrap slot kept apart from the
/// store.
#[derive(Debug)]
pub struct VolumeDataModel<S: VolumeStore> {
    store: S,
    backend: String,
    cluster_id: Option<String>,
    bootstrap: Option<FilesystemVolume>,
}

impl<S: VolumeStore> VolumeDataModel<S> {
    /// Wraps `store` for `backend`.
    #[must_use]
    pub fn new(store: S, backend: impl Into<String>) -> Self {
        Self {
            store,
            backend: backend.into(),
            cluster_id: None,
            bootstrap: None,
        }
    }

    /// Records the cluster identity stamped on rows created from now on.
    pub fn set_cluster_id(&mut self, cluster_id: impl Into<String>) {
        self.cluster_id = Some(cluster_id.into());
    }

    /// Returns the active cluster identity.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    /// Backend whose rows this model manages.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Creates the backing table when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the store fails.
    pub fn ensure_table(&self) -> Result<(), ModelError> {
        self.store.ensure_table()
    }

    /// Records a new row, stamping backend and cluster id.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::BootstrapOccupied`] when another bootstrap
    /// volume is already held, or any store error.
    pub fn insert(&mut self, mut volume: FilesystemVolume) -> Result<(), ModelError> {
        volume.backend.clone_from(&self.backend);
        volume.cluster_id = self.cluster_id.clone().unwrap_or_default();

        match StorageSlot::for_name(&volume.name) {
            StorageSlot::InMemorySingleSlot => {
                if let Some(existing) = &self.bootstrap
                    && existing.name != volume.name
                {
                    return Err(ModelError::BootstrapOccupied {
                        existing: existing.name.clone(),
                        requested: volume.name,
                    });
                }
                self.bootstrap = Some(volume);
                Ok(())
            }
            StorageSlot::PersistedRow(_) => self.store.insert(&volume),
        }
    }

    /// Fetches a row. `Ok(None)` means the volume does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the store fails.
    pub fn get(&self, name: &str) -> Result<Option<FilesystemVolume>, ModelError> {
        match StorageSlot::for_name(name) {
            StorageSlot::InMemorySingleSlot => Ok(self
                .bootstrap
                .as_ref()
                .filter(|volume| volume.name == name)
                .cloned()),
            StorageSlot::PersistedRow(key) => self.store.get(&key, &self.backend),
        }
    }

    /// Deletes a row, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the store fails.
    pub fn delete(&mut self, name: &str) -> Result<bool, ModelError> {
        match StorageSlot::for_name(name) {
            StorageSlot::InMemorySingleSlot => {
                let held = self.bootstrap.as_ref().is_some_and(|volume| volume.name == name);
                if held {
                    self.bootstrap = None;
                }
                Ok(held)
            }
            StorageSlot::PersistedRow(key) => self.store.delete(&key, &self.backend),
        }
    }

    /// Lists every row of the backend, including the bootstrap volume.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the store fails.
    pub fn list_volumes(&self) -> Result<Vec<FilesystemVolume>, ModelError> {
        let mut volumes = self.store.list(&self.backend)?;
        if let Some(bootstrap) = &self.bootstrap {
            volumes.push(bootstrap.clone());
        }
        Ok(volumes)
    }
}

/// Copies uid and gid onto `volume` when both are present. A lone uid or gid
/// leaves the owner unset.
pub fn merge_permissions(volume: &mut FilesystemVolume, uid: Option<u32>, gid: Option<u32>) {
    if let (Some(uid), Some(gid)) = (uid, gid) {
        volume.owner = Some(Ownership { uid, gid });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn model() -> VolumeDataModel<SqliteVolumeStore> {
        let store = SqliteVolumeStore::in_memory().expect("in-memory store");
        let mut model = VolumeDataModel::new(store, "spectrum-scale");
        model.ensure_table().expect("table");
        model.set_cluster_id("7118073361626808055");
        model
    }

    #[rstest]
    #[case("scalevol-db", StorageSlot::InMemorySingleSlot)]
    #[case("prod-scalevol-db", StorageSlot::InMemorySingleSlot)]
    #[case("scalevol-db-old", StorageSlot::PersistedRow(String::from("scalevol-db-old")))]
    #[case("vol1", StorageSlot::PersistedRow(String::from("vol1")))]
    fn slot_is_routed_by_suffix(#[case] name: &str, #[case] expected: StorageSlot) {
        assert_eq!(StorageSlot::for_name(name), expected);
    }

    #[rstest]
    fn insert_stamps_backend_and_cluster(mut model: VolumeDataModel<SqliteVolumeStore>) {
        model
            .insert(FilesystemVolume::new("vol1", VolumeType::Fileset, "gpfs0", "vol1"))
            .expect("insert");

        let row = model.get("vol1").expect("get").expect("row present");
        assert_eq!(row.backend, "spectrum-scale");
        assert_eq!(row.cluster_id, "7118073361626808055");
    }

    #[rstest]
    fn missing_row_is_not_an_error(model: VolumeDataModel<SqliteVolumeStore>) {
        assert_eq!(model.get("absent").expect("get"), None);
    }

    #[rstest]
    fn bootstrap_volume_never_reaches_the_store(mut model: VolumeDataModel<SqliteVolumeStore>) {
        model
            .insert(FilesystemVolume::new("scalevol-db", VolumeType::Fileset, "gpfs0", "scalevol-db"))
            .expect("insert bootstrap");

        assert!(model.get("scalevol-db").expect("get").is_some());
        assert_eq!(
            model.store.get("scalevol-db", "spectrum-scale").expect("store get"),
            None
        );
        assert_eq!(model.list_volumes().expect("list").len(), 1);

        assert!(model.delete("scalevol-db").expect("delete"));
        assert!(model.get("scalevol-db").expect("get").is_none());
    }

    #[rstest]
    fn second_bootstrap_volume_is_rejected(mut model: VolumeDataModel<SqliteVolumeStore>) {
        model
            .insert(FilesystemVolume::new("a-scalevol-db", VolumeType::Fileset, "gpfs0", "a"))
            .expect("first bootstrap");

        let err = model
            .insert(FilesystemVolume::new("b-scalevol-db", VolumeType::Fileset, "gpfs0", "b"))
            .expect_err("slot occupied");

        assert!(matches!(err, ModelError::BootstrapOccupied { .. }));
    }

    #[rstest]
    #[case(Some(1000), Some(100), Some(Ownership { uid: 1000, gid: 100 }))]
    #[case(Some(1000), None, None)]
    #[case(None, Some(100), None)]
    #[case(None, None, None)]
    fn permissions_merge_only_as_a_pair(
        #[case] uid: Option<u32>,
        #[case] gid: Option<u32>,
        #[case] expected: Option<Ownership>,
    ) {
        let mut volume = FilesystemVolume::new("vol1", VolumeType::Fileset, "gpfs0", "vol1");
        merge_permissions(&mut volume, uid, gid);
        assert_eq!(volume.owner, expected);
    }

    #[rstest]
    fn list_includes_rows_and_bootstrap(mut model: VolumeDataModel<SqliteVolumeStore>) {
        for name in ["b", "a", "scalevol-db"] {
            model
                .insert(FilesystemVolume::new(name, VolumeType::Fileset, "gpfs0", name))
                .expect("insert");
        }

        let names: Vec<String> = model
            .list_volumes()
            .expect("list")
            .into_iter()
            .map(|volume| volume.name)
            .collect();

        assert_eq!(names, vec!["a", "b", "scalevol-db"]);
    }
}
