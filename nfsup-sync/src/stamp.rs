//! Completion stamp: last successful synchronization time of an nfsroot.
//!
//! Persists a single line `YYYY-MM-DDTHH:MM:SSZ\n` at
//! `<nfsroot>/etc/nfs-export-updated`. Writes go through a `.tmp` sibling and
//! a rename so a reader never sees a half-written stamp.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{io_err, SyncError};

/// Stamp location relative to the target root.
pub const STAMP_RELATIVE_PATH: &str = "etc/nfs-export-updated";

const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `<nfsroot>/etc/nfs-export-updated` (pure, no I/O).
pub fn stamp_path(nfsroot: &Path) -> PathBuf {
    nfsroot.join(STAMP_RELATIVE_PATH)
}

/// Render `at` the way the stamp file stores it, including the newline.
pub fn format_stamp(at: DateTime<Utc>) -> String {
    format!("{}\n", at.format(STAMP_FORMAT))
}

/// Overwrite the stamp under `nfsroot` with `at`.
pub fn write_at(nfsroot: &Path, at: DateTime<Utc>) -> Result<(), SyncError> {
    let path = stamp_path(nfsroot);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format_stamp(at)).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Read the stamp under `nfsroot`.
///
/// Returns `Ok(None)` when the nfsroot was never synchronized.
pub fn read_at(nfsroot: &Path) -> Result<Option<DateTime<Utc>>, SyncError> {
    let path = stamp_path(nfsroot);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    NaiveDateTime::parse_from_str(content.trim(), STAMP_FORMAT)
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| SyncError::MalformedStamp { path, content })
}
