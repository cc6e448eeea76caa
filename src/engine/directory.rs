//! Lightweight volume directories under a linked fileset junction.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use crate::model::Ownership;

use super::EngineError;

fn open_junction(junction: &Utf8Path) -> Result<Dir, EngineError> {
    Dir::open_ambient_dir(junction, ambient_authority())
        .map_err(|err| EngineError::directory(junction, err))
}

/// Creates `{junction}/{name}` and returns its path.
pub(crate) fn create(junction: &Utf8Path, name: &str) -> Result<Utf8PathBuf, EngineError> {
    let path = junction.join(name);
    let dir = open_junction(junction)?;
    match dir.create_dir(name) {
        Ok(()) => {
            debug!(%path, "created volume directory");
            Ok(path)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(EngineError::DirectoryExists { path })
        }
        Err(err) => Err(EngineError::directory(path, err)),
    }
}

/// Returns whether `{junction}/{name}` is an existing directory.
pub(crate) fn exists(junction: &Utf8Path, name: &str) -> Result<bool, EngineError> {
    match Dir::open_ambient_dir(junction, ambient_authority()) {
        Ok(dir) => Ok(dir.is_dir(name)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(EngineError::directory(junction, err)),
    }
}

/// Removes `{junction}/{name}` and everything below it. A directory that is
/// already gone is not an error.
pub(crate) fn remove_tree(junction: &Utf8Path, name: &str) -> Result<(), EngineError> {
    let path = junction.join(name);
    let dir = match Dir::open_ambient_dir(junction, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(%path, "fileset junction is gone; nothing to remove");
            return Ok(());
        }
        Err(err) => return Err(EngineError::directory(junction, err)),
    };
    match dir.remove_dir_all(name) {
        Ok(()) => {
            debug!(%path, "removed volume directory");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(EngineError::directory(path, err)),
    }
}

/// Applies `owner` to `path`.
pub(crate) fn apply_owner(path: &Utf8Path, owner: Ownership) -> Result<(), EngineError> {
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
        .map_err(|err| EngineError::directory(path, err))?;
    debug!(%path, uid = owner.uid, gid = owner.gid, "applied volume ownership");
    Ok(())
}
