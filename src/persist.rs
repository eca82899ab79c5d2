//! Atomic JSON file helpers.
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so readers see either the old file or the new one, never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SessionError, SessionResult};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SessionResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SessionError::fs("create directory", parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| SessionError::Index(format!("serialize {}: {}", path.display(), e)))?;

    let tmp = temp_path(path);
    let written = fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(&bytes)?;
        f.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(SessionError::fs("write", &tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SessionError::fs("rename", path, e)
    })
}

/// Read and parse a JSON file. Parse failures are reported as corruption.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> SessionResult<T> {
    let bytes = fs::read(path).map_err(|e| SessionError::fs("read", path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| SessionError::corrupt(path, e.to_string()))
}

/// Remove a file. A missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> SessionResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::fs("remove", path, e)),
    }
}

/// Recursively remove a directory. A missing directory is not an error.
pub fn remove_dir_if_exists(path: &Path) -> SessionResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::fs("remove", path, e)),
    }
}
