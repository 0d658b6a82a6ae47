//! Atomic filesystem primitives.
//!
//! Every on-disk mutation in the bus goes through this module. The only
//! filesystem guarantees relied on are atomic intra-directory rename,
//! exclusive create, readdir, and unlink — no advisory locks, no extended
//! rename flags.
//!
//! Rename is the commit point: a reader either sees the old file, no file,
//! or the complete new file, never a partial write. Inter-process claim
//! handoff (`new/` → `inflight/`, `new/` → `processing/`) uses the same
//! rename semantics; the loser of a claim race simply observes the source
//! vanish.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::store::error::StoreError;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `value` as JSON and atomically install it at `path`.
///
/// Writes to a sibling temp file (`<name>.tmp-<pid>-<nanos>-<rand>`), fsyncs
/// it, then renames over the target. The parent directory is fsynced
/// best-effort afterwards. On any failure the temp file is removed and the
/// target is left untouched.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| io_err(path, std::io::Error::other("path has no parent directory")))?;
    ensure_dir(parent)?;

    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp = parent.join(format!(
        "{}.tmp-{}-{}-{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id(),
        crate::clock::epoch_millis(),
        uuid::Uuid::new_v4().simple(),
    ));

    let commit = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.sync_data()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if let Err(e) = commit {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    // Persist the rename itself. Failure here is tolerated: the rename is
    // already visible and a crash at worst loses an entry the writer will
    // recreate on its next pass.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Read and decode a JSON record from `path`.
///
/// Distinguishes [`StoreError::NotFound`] (file absent) from
/// [`StoreError::Corrupt`] (present but undecodable) so callers can route
/// poison handling separately from transient conditions.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(io_err(path, e)),
    };

    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically move `src` to `dst`, claiming exclusive ownership of the file.
///
/// Returns `Ok(false)` iff `src` vanished before the rename — another
/// claimant won the race. All other failures are I/O errors.
pub fn claim_move(src: &Path, dst: &Path) -> Result<bool, StoreError> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(src, e)),
    }
}

/// List file names in `dir` ending with `suffix`, ascending lexical order.
///
/// A missing directory is an empty listing, not an error. Callers name files
/// with a monotonic millisecond prefix so lexical order is creation order;
/// in-progress temp files never match the `.json` suffix.
pub fn list_sorted(dir: &Path, suffix: &str) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(suffix))
        .collect();
    names.sort();
    Ok(names)
}

/// Recursively create `path` if needed. Idempotent.
pub fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).map_err(|e| io_err(path, e))
}

/// Remove `path`, silently succeeding when it is already gone.
pub fn unlink(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}
