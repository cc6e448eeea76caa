//! Volume type and import resolution.
//!
//! [`Plan::resolve`] evaluates the creation rules in a fixed precedence and
//! maps every option combination onto exactly one [`Plan`] or
//! [`OptionsError`].

use crate::connector::FilesetOptions;
use crate::model::VolumeType;

use super::options::{OptionsError, RequestedType, VolumeOptions};

/// Connector sequence chosen for a `create` request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Plan {
    /// Create a fileset named after the volume.
    CreateFileset {
        /// Target filesystem.
        filesystem: String,
        /// Fileset to create.
        fileset: String,
        /// Inode settings.
        inode: FilesetOptions,
    },
    /// Create a fileset, then set its block quota.
    CreateFilesetQuota {
        /// Target filesystem.
        filesystem: String,
        /// Fileset to create.
        fileset: String,
        /// Inode settings.
        inode: FilesetOptions,
        /// Quota token to apply.
        quota: String,
    },
    /// Create a directory inside an existing fileset.
    CreateLightweight {
        /// Filesystem holding the fileset.
        filesystem: String,
        /// Fileset holding the directory.
        fileset: String,
        /// Directory to create.
        directory: String,
    },
    /// Adopt an existing fileset.
    ImportFileset {
        /// Filesystem holding the fileset.
        filesystem: String,
        /// Existing fileset.
        fileset: String,
    },
    /// Adopt an existing fileset whose quota must match.
    ImportFilesetQuota {
        /// Filesystem holding the fileset.
        filesystem: String,
        /// Existing fileset.
        fileset: String,
        /// Quota the cluster must report.
        quota: String,
    },
    /// Adopt an existing directory inside a fileset.
    ImportLightweight {
        /// Filesystem holding the fileset.
        filesystem: String,
        /// Fileset holding the directory.
        fileset: String,
        /// Existing directory.
        directory: String,
    },
}

impl Plan {
    /// Resolves the plan for volume `name`.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] when the options are inconsistent.
    pub fn resolve(
        name: &str,
        options: &VolumeOptions,
        default_filesystem: &str,
    ) -> Result<Self, OptionsError> {
        let requested = options.volume_type.unwrap_or(if options.directory.is_some() {
            RequestedType::Lightweight
        } else {
            RequestedType::Fileset
        });

        match requested {
            RequestedType::Fileset => Self::resolve_fileset(name, options, default_filesystem),
            RequestedType::Lightweight => Self::resolve_lightweight(name, options),
        }
    }

    fn resolve_fileset(
        name: &str,
        options: &VolumeOptions,
        default_filesystem: &str,
    ) -> Result<Self, OptionsError> {
        if let Some(fileset) = &options.fileset {
            if options.has_ownership() {
                return Err(OptionsError::OwnershipWithImport { resource: "fileset" });
            }
            let filesystem = options.filesystem.clone().ok_or(OptionsError::Missing {
                key: "filesystem",
                context: "importing an existing fileset",
            })?;
            if let Some(quota) = &options.quota {
                return Ok(Self::ImportFilesetQuota {
                    filesystem,
                    fileset: fileset.clone(),
                    quota: quota.clone(),
                });
            }
            return Ok(Self::ImportFileset {
                filesystem,
                fileset: fileset.clone(),
            });
        }

        let filesystem = options
            .filesystem
            .clone()
            .unwrap_or_else(|| default_filesystem.to_owned());
        let inode = FilesetOptions {
            inode_space: options.inode_space.clone(),
            inode_limit: options.inode_limit.clone(),
        };
        if let Some(quota) = &options.quota {
            return Ok(Self::CreateFilesetQuota {
                filesystem,
                fileset: name.to_owned(),
                inode,
                quota: quota.clone(),
            });
        }
        Ok(Self::CreateFileset {
            filesystem,
            fileset: name.to_owned(),
            inode,
        })
    }

    fn resolve_lightweight(name: &str, options: &VolumeOptions) -> Result<Self, OptionsError> {
        let importing = options.directory.is_some();
        if importing && options.has_ownership() {
            return Err(OptionsError::OwnershipWithImport {
                resource: "directory",
            });
        }
        let context = if importing {
            "importing an existing directory"
        } else {
            "a lightweight volume"
        };
        let filesystem = options.filesystem.clone().ok_or(OptionsError::Missing {
            key: "filesystem",
            context,
        })?;
        let fileset = options.fileset.clone().ok_or(OptionsError::Missing {
            key: "fileset",
            context,
        })?;
        if options.quota.is_some() {
            return Err(OptionsError::QuotaNotAllowed);
        }

        if let Some(directory) = &options.directory {
            return Ok(Self::ImportLightweight {
                filesystem,
                fileset,
                directory: directory.clone(),
            });
        }
        Ok(Self::CreateLightweight {
            filesystem,
            fileset,
            directory: name.to_owned(),
        })
    }

    /// Volume type recorded for this plan.
    #[must_use]
    pub const fn volume_type(&self) -> VolumeType {
        match self {
            Self::CreateFileset { .. } | Self::ImportFileset { .. } => VolumeType::Fileset,
            Self::CreateFilesetQuota { .. } | Self::ImportFilesetQuota { .. } => {
                VolumeType::FilesetWithQuota
            }
            Self::CreateLightweight { .. } | Self::ImportLightweight { .. } => {
                VolumeType::Lightweight
            }
        }
    }

    /// Returns `true` when the plan adopts an existing resource.
    #[must_use]
    pub const fn is_import(&self) -> bool {
        matches!(
            self,
            Self::ImportFileset { .. }
                | Self::ImportFilesetQuota { .. }
                | Self::ImportLightweight { .. }
        )
    }

    /// Filesystem the plan targets.
    #[must_use]
    pub fn filesystem(&self) -> &str {
        match self {
            Self::CreateFileset { filesystem, .. }
            | Self::CreateFilesetQuota { filesystem, .. }
            | Self::CreateLightweight { filesystem, .. }
            | Self::ImportFileset { filesystem, .. }
            | Self::ImportFilesetQuota { filesystem, .. }
            | Self::ImportLightweight { filesystem, .. } => filesystem,
        }
    }

    /// Fileset the plan targets.
    #[must_use]
    pub fn fileset(&self) -> &str {
        match self {
            Self::CreateFileset { fileset, .. }
            | Self::CreateFilesetQuota { fileset, .. }
            | Self::CreateLightweight { fileset, .. }
            | Self::ImportFileset { fileset, .. }
            | Self::ImportFilesetQuota { fileset, .. }
            | Self::ImportLightweight { fileset, .. } => fileset,
        }
    }

    /// Lightweight directory, if any.
    #[must_use]
    pub fn directory(&self) -> Option<&str> {
        match self {
            Self::CreateLightweight { directory, .. } | Self::ImportLightweight { directory, .. } => {
                Some(directory)
            }
            _ => None,
        }
    }

    /// Quota token, if any.
    #[must_use]
    pub fn quota(&self) -> Option<&str> {
        match self {
            Self::CreateFilesetQuota { quota, .. } | Self::ImportFilesetQuota { quota, .. } => {
                Some(quota)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn resolve(name: &str, input: &[&str]) -> Result<Plan, OptionsError> {
        let options = VolumeOptions::from_assignments(input).expect("valid options");
        Plan::resolve(name, &options, "fs0")
    }

    #[test]
    fn empty_options_create_a_default_fileset() {
        assert_eq!(
            resolve("v1", &[]),
            Ok(Plan::CreateFileset {
                filesystem: String::from("fs0"),
                fileset: String::from("v1"),
                inode: FilesetOptions::default(),
            })
        );
    }

    #[test]
    fn inode_options_reach_the_create_plan() {
        let plan = resolve("v1", &["inode-space=new", "inode-limit=1024", "filesystem=gpfs1"])
            .expect("plan");
        assert_eq!(
            plan,
            Plan::CreateFileset {
                filesystem: String::from("gpfs1"),
                fileset: String::from("v1"),
                inode: FilesetOptions {
                    inode_space: Some(String::from("new")),
                    inode_limit: Some(String::from("1024")),
                },
            }
        );
    }

    #[rstest]
    #[case(&["type=fileset", "quota=1Gi"], VolumeType::FilesetWithQuota, false, "fs0", "v")]
    #[case(&["quota=1Gi", "uid=1", "gid=2"], VolumeType::FilesetWithQuota, false, "fs0", "v")]
    #[case(&["fileset=old", "filesystem=gpfs1"], VolumeType::Fileset, true, "gpfs1", "old")]
    #[case(&["fileset=old", "filesystem=gpfs1", "quota=5G"], VolumeType::FilesetWithQuota, true, "gpfs1", "old")]
    #[case(&["type=lightweight", "fileset=f1", "filesystem=fs0"], VolumeType::Lightweight, false, "fs0", "f1")]
    #[case(&["directory=d", "fileset=f1", "filesystem=fs0"], VolumeType::Lightweight, true, "fs0", "f1")]
    #[case(&["type=lightweight", "fileset=f1", "filesystem=fs0", "uid=1", "gid=1"], VolumeType::Lightweight, false, "fs0", "f1")]
    #[case(&["fileset=old", "filesystem=gpfs1", "uid=1"], VolumeType::Fileset, true, "gpfs1", "old")]
    fn decision_table_outcomes(
        #[case] input: &[&str],
        #[case] volume_type: VolumeType,
        #[case] import: bool,
        #[case] filesystem: &str,
        #[case] fileset: &str,
    ) {
        let plan = resolve("v", input).expect("plan");
        assert_eq!(plan.volume_type(), volume_type);
        assert_eq!(plan.is_import(), import);
        assert_eq!(plan.filesystem(), filesystem);
        assert_eq!(plan.fileset(), fileset);
    }

    #[rstest]
    #[case(&["fileset=old", "filesystem=fs0", "uid=1", "gid=1"], OptionsError::OwnershipWithImport { resource: "fileset" })]
    #[case(&["directory=d", "fileset=f", "filesystem=fs0", "uid=1", "gid=1"], OptionsError::OwnershipWithImport { resource: "directory" })]
    #[case(&["fileset=old"], OptionsError::Missing { key: "filesystem", context: "importing an existing fileset" })]
    #[case(&["directory=d", "fileset=f"], OptionsError::Missing { key: "filesystem", context: "importing an existing directory" })]
    #[case(&["directory=d", "filesystem=fs0"], OptionsError::Missing { key: "fileset", context: "importing an existing directory" })]
    #[case(&["directory=d", "fileset=f", "filesystem=fs0", "quota=1G"], OptionsError::QuotaNotAllowed)]
    #[case(&["type=lightweight", "fileset=f"], OptionsError::Missing { key: "filesystem", context: "a lightweight volume" })]
    #[case(&["type=lightweight", "filesystem=fs0"], OptionsError::Missing { key: "fileset", context: "a lightweight volume" })]
    #[case(&["type=lightweight", "fileset=f", "filesystem=fs0", "quota=1G"], OptionsError::QuotaNotAllowed)]
    fn decision_table_errors(#[case] input: &[&str], #[case] expected: OptionsError) {
        assert_eq!(resolve("v", input), Err(expected));
    }

    #[test]
    fn explicit_fileset_type_with_directory_ignores_directory_for_type() {
        let plan = resolve("v", &["type=fileset", "directory=d"]).expect("plan");
        assert_eq!(plan.volume_type(), VolumeType::Fileset);
        assert_eq!(plan.directory(), None);
    }
}
