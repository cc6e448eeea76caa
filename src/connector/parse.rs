//! Positional parsers for the machine-readable output of the cluster
//! administration commands.
//!
//! The `-Y` output of the `mm*` commands is colon-delimited with a fixed
//! field order, and the first data line is preceded by a `HEADER` line.
//! Field positions below are zero-based indexes into a split line. A line
//! that is too short for the field being read is a parse failure, never a
//! "not found" result.

use camino::Utf8PathBuf;

use super::ConnectorError;
use super::FilesetInfo;

/// Line of `mmlscluster` output holding `GPFS cluster id: <id>`.
const CLUSTER_ID_LINE: usize = 4;

/// `mmlsmount -L -Y`: `nodeName`.
const MOUNT_NODE_NAME_FIELD: usize = 11;

/// `mmlsfs -T -Y`: `deviceName`, `fieldName`, `data`.
const FS_DEVICE_FIELD: usize = 6;
const FS_ATTRIBUTE_FIELD: usize = 7;
const FS_VALUE_FIELD: usize = 8;
const DEFAULT_MOUNT_POINT_ATTRIBUTE: &str = "defaultMountPoint";

/// `mmlsfileset -Y`: `filesystemName`, `filesetName`, `id`, `path`.
const FILESET_FILESYSTEM_FIELD: usize = 6;
const FILESET_NAME_FIELD: usize = 7;
const FILESET_ID_FIELD: usize = 8;
const FILESET_PATH_FIELD: usize = 11;

/// `mmlsquota -j`: data line index and whitespace field holding the block
/// quota.
const QUOTA_LINE: usize = 2;
const QUOTA_FIELD: usize = 3;

/// Placeholder the cluster reports as the path of an unlinked fileset.
pub(crate) const UNLINKED_PATH_PLACEHOLDER: &str = "--";

/// Extracts the cluster identifier from `mmlscluster` output.
pub(crate) fn cluster_id(output: &str) -> Result<String, ConnectorError> {
    let line = output
        .split('\n')
        .nth(CLUSTER_ID_LINE)
        .ok_or_else(|| ConnectorError::parse("cluster id", "mmlscluster output is too short"))?;

    let fields: Vec<&str> = line.split(':').collect();
    let [_, value] = fields.as_slice() else {
        return Err(ConnectorError::parse(
            "cluster id",
            format!("expected 2 fields, found {} in {line:?}", fields.len()),
        ));
    };

    let id = value.trim();
    if id.is_empty() {
        return Err(ConnectorError::parse("cluster id", "cluster id is empty"));
    }
    Ok(id.to_owned())
}

/// Returns the node names on which the filesystem is mounted.
pub(crate) fn mounted_nodes(output: &str) -> Result<Vec<String>, ConnectorError> {
    data_lines(output)
        .map(|fields| {
            fields
                .get(MOUNT_NODE_NAME_FIELD)
                .map(|node| (*node).to_owned())
                .ok_or_else(|| {
                    ConnectorError::parse(
                        "mount state",
                        format!("expected more than {MOUNT_NODE_NAME_FIELD} fields, found {}", fields.len()),
                    )
                })
        })
        .collect()
}

/// Returns `(filesystem, default mount point)` pairs from `mmlsfs -T -Y`.
pub(crate) fn filesystem_mountpoints(
    output: &str,
) -> Result<Vec<(String, Utf8PathBuf)>, ConnectorError> {
    let mut mountpoints = Vec::new();
    for fields in data_lines(output) {
        let (Some(device), Some(attribute), Some(value)) = (
            fields.get(FS_DEVICE_FIELD),
            fields.get(FS_ATTRIBUTE_FIELD),
            fields.get(FS_VALUE_FIELD),
        ) else {
            return Err(ConnectorError::parse(
                "filesystem mountpoint",
                format!("expected more than {FS_VALUE_FIELD} fields, found {}", fields.len()),
            ));
        };
        if *attribute != DEFAULT_MOUNT_POINT_ATTRIBUTE {
            continue;
        }
        let path = decode_field("filesystem mountpoint", value)?;
        mountpoints.push(((*device).to_owned(), Utf8PathBuf::from(path)));
    }
    Ok(mountpoints)
}

/// Parses the single fileset described by `mmlsfileset <fs> <fileset> -Y`.
pub(crate) fn fileset(output: &str) -> Result<FilesetInfo, ConnectorError> {
    let lines: Vec<Vec<&str>> = data_lines(output).collect();
    let [fields] = lines.as_slice() else {
        return Err(ConnectorError::parse(
            "fileset",
            format!("expected exactly 1 fileset line, found {}", lines.len()),
        ));
    };

    let (Some(filesystem), Some(name), Some(id), Some(path)) = (
        fields.get(FILESET_FILESYSTEM_FIELD),
        fields.get(FILESET_NAME_FIELD),
        fields.get(FILESET_ID_FIELD),
        fields.get(FILESET_PATH_FIELD),
    ) else {
        return Err(ConnectorError::parse(
            "fileset",
            format!("expected more than {FILESET_PATH_FIELD} fields, found {}", fields.len()),
        ));
    };

    let link_path = decode_field("fileset link path", path)?;
    Ok(FilesetInfo {
        name: (*name).to_owned(),
        filesystem: (*filesystem).to_owned(),
        id: (*id).to_owned(),
        link_path: link_path_from_report(&link_path),
    })
}

/// Extracts the block quota token from `mmlsquota -j` output.
pub(crate) fn fileset_quota(output: &str) -> Result<String, ConnectorError> {
    let line = output
        .split('\n')
        .nth(QUOTA_LINE)
        .ok_or_else(|| ConnectorError::parse("fileset quota", "mmlsquota output is too short"))?;

    line.split_whitespace()
        .nth(QUOTA_FIELD)
        .map(str::to_owned)
        .ok_or_else(|| {
            ConnectorError::parse(
                "fileset quota",
                format!("expected more than {QUOTA_FIELD} fields in {line:?}"),
            )
        })
}

/// Normalises a cluster-reported link path: empty and placeholder values
/// mean the fileset is not linked.
pub(crate) fn link_path_from_report(path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == UNLINKED_PATH_PLACEHOLDER {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn data_lines(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(':').collect::<Vec<_>>())
        .filter(|fields| fields.get(2).is_none_or(|kind| *kind != "HEADER"))
}

fn decode_field(what: &str, value: &str) -> Result<String, ConnectorError> {
    urlencoding::decode(value)
        .map(std::borrow::Cow::into_owned)
        .map_err(|err| ConnectorError::parse(what, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MMLSCLUSTER: &str = "\nGPFS cluster information\n========================\n  GPFS cluster name:         gpfs.example.com\n  GPFS cluster id:           7118073361626808055\n  GPFS UID domain:           gpfs.example.com\n";

    const MMLSMOUNT: &str = "mmlsmount::HEADER:version:reserved:reserved:localDevName:realDevName:owningCluster:totalNodes:nodeIP:nodeName:clusterName:env:\nmmlsmount::0:1:::gpfs0:gpfs0:gpfs.example.com:2:10.0.0.1:node1:gpfs.example.com:RW:\nmmlsmount::0:1:::gpfs0:gpfs0:gpfs.example.com:2:10.0.0.2:node2:gpfs.example.com:RW:\n";

    const MMLSFS: &str = "mmlsfs::HEADER:version:reserved:reserved:deviceName:fieldName:data:remarks:\nmmlsfs::0:1:::gpfs0:defaultMountPoint:%2Fgpfs%2Fgpfs0::\nmmlsfs::0:1:::gpfs1:defaultMountPoint:%2Fibm%2Fgpfs1::\n";

    const MMLSFILESET_LINKED: &str = "mmlsfileset::HEADER:version:reserved:reserved:filesystemName:filesetName:id:rootInode:status:path:parentId:\nmmlsfileset::0:1:::gpfs0:vol1:7:524291:Linked:%2Fgpfs%2Fgpfs0%2Fvol1:0:\n";

    const MMLSFILESET_UNLINKED: &str = "mmlsfileset::HEADER:version:reserved:reserved:filesystemName:filesetName:id:rootInode:status:path:parentId:\nmmlsfileset::0:1:::gpfs0:vol1:7:524291:Unlinked:--:0:\n";

    const MMLSQUOTA: &str = "                         Block Limits                                    |     File Limits\nFilesystem type             blocks      quota      limit   in_doubt    grace |    files   quota    limit in_doubt    grace  Remarks\ngpfs0      FILESET              0         1G         1G          0     none |        1       0        0        0     none\n";

    #[test]
    fn cluster_id_reads_second_token_of_id_line() {
        let id = cluster_id(MMLSCLUSTER).expect("cluster id");
        assert_eq!(id, "7118073361626808055");
    }

    #[rstest]
    #[case("")]
    #[case("a\nb\nc\n")]
    #[case("\n\n\n\n  GPFS cluster id: 1: extra\n")]
    #[case("\n\n\n\n  GPFS cluster id:   \n")]
    fn cluster_id_rejects_unexpected_layouts(#[case] output: &str) {
        let err = cluster_id(output).expect_err("layout should be rejected");
        assert!(err.to_string().starts_with("cannot determine cluster id"));
    }

    #[test]
    fn mounted_nodes_lists_node_names() {
        let nodes = mounted_nodes(MMLSMOUNT).expect("nodes");
        assert_eq!(nodes, vec![String::from("node1"), String::from("node2")]);
    }

    #[test]
    fn mounted_nodes_is_empty_for_header_only_output() {
        let header = MMLSMOUNT.lines().next().unwrap_or_default();
        assert!(mounted_nodes(header).expect("nodes").is_empty());
    }

    #[test]
    fn mounted_nodes_rejects_short_lines() {
        let err = mounted_nodes("mmlsmount::0:1:::gpfs0\n").expect_err("short line");
        assert!(matches!(err, ConnectorError::Parse { .. }));
    }

    #[test]
    fn filesystem_mountpoints_decode_paths() {
        let mountpoints = filesystem_mountpoints(MMLSFS).expect("mountpoints");
        assert_eq!(
            mountpoints,
            vec![
                (String::from("gpfs0"), Utf8PathBuf::from("/gpfs/gpfs0")),
                (String::from("gpfs1"), Utf8PathBuf::from("/ibm/gpfs1")),
            ]
        );
    }

    #[test]
    fn fileset_reports_link_path_when_linked() {
        let info = fileset(MMLSFILESET_LINKED).expect("fileset");
        assert_eq!(info.name, "vol1");
        assert_eq!(info.filesystem, "gpfs0");
        assert_eq!(info.id, "7");
        assert_eq!(info.link_path.as_deref(), Some("/gpfs/gpfs0/vol1"));
        assert!(info.is_linked());
    }

    #[test]
    fn fileset_placeholder_path_means_unlinked() {
        let info = fileset(MMLSFILESET_UNLINKED).expect("fileset");
        assert_eq!(info.link_path, None);
        assert!(!info.is_linked());
    }

    #[test]
    fn fileset_requires_exactly_one_data_line() {
        let header = MMLSFILESET_LINKED.lines().next().unwrap_or_default();
        let err = fileset(header).expect_err("no data line");
        assert!(err.to_string().contains("expected exactly 1 fileset line"));
    }

    #[test]
    fn fileset_quota_reads_block_quota() {
        assert_eq!(fileset_quota(MMLSQUOTA).expect("quota"), "1G");
    }

    #[test]
    fn fileset_quota_rejects_truncated_output() {
        let err = fileset_quota("header\nheader\ngpfs0 FILESET 0\n").expect_err("short");
        assert!(matches!(err, ConnectorError::Parse { .. }));
    }
}
