//! Core library for the scalevol provisioning control plane.
//!
//! The crate turns volume requests into fileset, link and quota operations
//! on a clustered (GPFS-class) filesystem. A [`Connector`] talks to the
//! cluster over one of four transports, the [`VolumeDataModel`] records which
//! cluster resource backs each logical volume, and the
//! [`ProvisioningEngine`] ties both together behind a per-backend lock.

pub mod config;
pub mod connector;
pub mod engine;
pub mod lock;
pub mod model;
pub mod runner;
pub mod test_support;

pub use config::{ConfigError, ScaleConfig};
pub use connector::{Connector, ConnectorError, ConnectorKind, FilesetInfo, FilesetOptions};
pub use engine::{EngineError, OptionsError, Plan, ProvisioningEngine, VolumeInfo, VolumeOptions};
pub use lock::{BackendLock, LockError, LockGuard};
pub use model::{
    FilesystemVolume, ModelError, Ownership, SqliteVolumeStore, StorageSlot, VolumeDataModel,
    VolumeStore, VolumeType,
};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};
