//! SQLite-backed [`VolumeStore`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use super::{FilesystemVolume, ModelError, Ownership, VolumeStore, VolumeType};

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS filesystem_volumes (
    name           TEXT    NOT NULL,
    backend        TEXT    NOT NULL,
    volume_type    TEXT    NOT NULL,
    cluster_id     TEXT    NOT NULL,
    filesystem     TEXT    NOT NULL,
    fileset        TEXT    NOT NULL,
    directory      TEXT,
    quota          TEXT,
    uid            INTEGER,
    gid            INTEGER,
    is_preexisting INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (name, backend)
);";

const SELECT_COLUMNS: &str = "SELECT name, backend, volume_type, cluster_id, filesystem, fileset, \
     directory, quota, uid, gid, is_preexisting FROM filesystem_volumes";

/// Volume rows stored in a single SQLite table.
#[derive(Debug)]
pub struct SqliteVolumeStore {
    conn: Mutex<Connection>,
}

/// Raw column values of one row, decoded outside the rusqlite closure so
/// corrupt rows surface as [`ModelError::CorruptRow`].
struct RawRow {
    name: String,
    backend: String,
    volume_type: String,
    cluster_id: String,
    filesystem: String,
    fileset: String,
    directory: Option<String>,
    quota: Option<String>,
    uid: Option<i64>,
    gid: Option<i64>,
    is_preexisting: bool,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            backend: row.get(1)?,
            volume_type: row.get(2)?,
            cluster_id: row.get(3)?,
            filesystem: row.get(4)?,
            fileset: row.get(5)?,
            directory: row.get(6)?,
            quota: row.get(7)?,
            uid: row.get(8)?,
            gid: row.get(9)?,
            is_preexisting: row.get(10)?,
        })
    }

    fn decode(self) -> Result<FilesystemVolume, ModelError> {
        let corrupt = |detail: String| ModelError::CorruptRow {
            name: self.name.clone(),
            detail,
        };
        let volume_type: VolumeType = self.volume_type.parse().map_err(corrupt)?;
        let owner = match (self.uid, self.gid) {
            (Some(uid), Some(gid)) => Some(Ownership {
                uid: u32::try_from(uid).map_err(|err| corrupt(format!("uid {uid}: {err}")))?,
                gid: u32::try_from(gid).map_err(|err| corrupt(format!("gid {gid}: {err}")))?,
            }),
            (None, None) => None,
            _ => return Err(corrupt(String::from("uid and gid must be set together"))),
        };
        Ok(FilesystemVolume {
            name: self.name,
            backend: self.backend,
            volume_type,
            cluster_id: self.cluster_id,
            filesystem: self.filesystem,
            fileset: self.fileset,
            directory: self.directory,
            quota: self.quota,
            owner,
            is_preexisting: self.is_preexisting,
        })
    }
}

impl SqliteVolumeStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Open`] when SQLite cannot open the file.
    pub fn open(path: &Utf8Path) -> Result<Self, ModelError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|source| ModelError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Open`] when SQLite cannot allocate it.
    pub fn in_memory() -> Result<Self, ModelError> {
        let conn = Connection::open_in_memory().map_err(|source| ModelError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VolumeStore for SqliteVolumeStore {
    fn ensure_table(&self) -> Result<(), ModelError> {
        self.conn()
            .execute_batch(CREATE_TABLE)
            .map_err(|err| ModelError::store("create table", err))
    }

    fn insert(&self, volume: &FilesystemVolume) -> Result<(), ModelError> {
        self.conn()
            .execute(
                "INSERT INTO filesystem_volumes (name, backend, volume_type, cluster_id, \
                 filesystem, fileset, directory, quota, uid, gid, is_preexisting) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    volume.name,
                    volume.backend,
                    volume.volume_type.as_str(),
                    volume.cluster_id,
                    volume.filesystem,
                    volume.fileset,
                    volume.directory,
                    volume.quota,
                    volume.owner.map(|owner| owner.uid),
                    volume.owner.map(|owner| owner.gid),
                    volume.is_preexisting,
                ],
            )
            .map(|_| ())
            .map_err(|err| ModelError::store("insert", err))
    }

    fn get(&self, name: &str, backend: &str) -> Result<Option<FilesystemVolume>, ModelError> {
        let raw = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE name = ?1 AND backend = ?2"),
                params![name, backend],
                RawRow::read,
            )
            .optional()
            .map_err(|err| ModelError::store("get", err))?;
        raw.map(RawRow::decode).transpose()
    }

    fn delete(&self, name: &str, backend: &str) -> Result<bool, ModelError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM filesystem_volumes WHERE name = ?1 AND backend = ?2",
                params![name, backend],
            )
            .map_err(|err| ModelError::store("delete", err))?;
        Ok(removed > 0)
    }

    fn list(&self, backend: &str) -> Result<Vec<FilesystemVolume>, ModelError> {
        let conn = self.conn();
        let mut statement = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE backend = ?1 ORDER BY name"))
            .map_err(|err| ModelError::store("list", err))?;
        let raws = statement
            .query_map(params![backend], RawRow::read)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|err| ModelError::store("list", err))?;
        raws.into_iter().map(RawRow::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> SqliteVolumeStore {
        let store = SqliteVolumeStore::in_memory().expect("in-memory store");
        store.ensure_table().expect("table");
        store
    }

    fn lightweight_row() -> FilesystemVolume {
        let mut volume = FilesystemVolume::new("lw1", VolumeType::Lightweight, "gpfs0", "shared")
            .with_directory("lw1");
        volume.backend = String::from("spectrum-scale");
        volume.cluster_id = String::from("42");
        volume.owner = Some(Ownership { uid: 1000, gid: 100 });
        volume
    }

    #[rstest]
    fn rows_survive_a_store_round_trip(store: SqliteVolumeStore) {
        let volume = lightweight_row();
        store.insert(&volume).expect("insert");

        let fetched = store.get("lw1", "spectrum-scale").expect("get");

        assert_eq!(fetched, Some(volume));
    }

    #[rstest]
    fn rows_are_scoped_by_backend(store: SqliteVolumeStore) {
        store.insert(&lightweight_row()).expect("insert");

        assert_eq!(store.get("lw1", "other-backend").expect("get"), None);
        assert!(store.list("other-backend").expect("list").is_empty());
        assert!(!store.delete("lw1", "other-backend").expect("delete"));
        assert!(store.delete("lw1", "spectrum-scale").expect("delete"));
    }

    #[rstest]
    fn duplicate_insert_fails(store: SqliteVolumeStore) {
        store.insert(&lightweight_row()).expect("insert");
        let err = store.insert(&lightweight_row()).expect_err("duplicate");
        assert!(matches!(err, ModelError::Store { operation: "insert", .. }));
    }

    #[rstest]
    fn ensure_table_is_idempotent(store: SqliteVolumeStore) {
        store.ensure_table().expect("second create");
    }

    #[rstest]
    fn unknown_type_is_reported_as_corrupt(store: SqliteVolumeStore) {
        store
            .conn()
            .execute(
                "INSERT INTO filesystem_volumes (name, backend, volume_type, cluster_id, \
                 filesystem, fileset) VALUES ('bad', 'b', 'block', '', 'gpfs0', 'bad')",
                [],
            )
            .expect("raw insert");

        let err = store.get("bad", "b").expect_err("corrupt row");

        assert!(matches!(err, ModelError::CorruptRow { ref name, .. } if name == "bad"));
    }

    #[test]
    fn database_file_is_created_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path())
            .expect("utf-8 tempdir")
            .join("volumes.db");

        let store = SqliteVolumeStore::open(&path).expect("open");
        store.ensure_table().expect("table");

        assert!(path.exists());
    }
}
