//! JSON Snapshots
//!
//! Saves a [`StorageEngine`] to disk and loads it back, so flags survive
//! process restarts. The file is a JSON array of rows ordered by id:
//!
//! ```text
//! [
//!   { "user_id": 42, "key": "banner_v2", "meta_id": 2, "value": [34, 100, ...] },
//!   ...
//! ]
//! ```
//!
//! Writes go to a sibling temp file first and are renamed into place.

use crate::storage::{MetaEntry, MetaId, StorageEngine, UserId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the file failed
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid snapshot
    #[error("snapshot format error: {0}")]
    Json(#[from] serde_json::Error),

    /// A row's id leaves no room for the ids that follow it
    #[error("meta id {meta_id} for '{key}' is out of range")]
    IdOutOfRange { key: String, meta_id: MetaId },
}

/// `flags.json` -> `flags.json.tmp`. Always differs from `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    user_id: UserId,
    key: String,
    meta_id: MetaId,
    value: Bytes,
}

impl StorageEngine {
    /// Writes every entry to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let rows: Vec<SnapshotRow> = self
            .dump()
            .into_iter()
            .map(|(user_id, key, entry)| SnapshotRow {
                user_id,
                key,
                meta_id: entry.id,
                value: entry.value,
            })
            .collect();

        let tmp = temp_path(path);
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &rows)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), entries = rows.len(), "Snapshot saved");
        Ok(())
    }

    /// Builds an engine from the snapshot at `path`.
    ///
    /// A missing file yields an empty engine.
    pub fn load(path: impl AsRef<Path>, table_prefix: &str) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let engine = StorageEngine::with_table_prefix(table_prefix);

        if !path.exists() {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(engine);
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let rows: Vec<SnapshotRow> = serde_json::from_reader(reader)?;
        let count = rows.len();

        for row in rows {
            if row.meta_id == MetaId::MAX {
                return Err(SnapshotError::IdOutOfRange {
                    key: row.key,
                    meta_id: row.meta_id,
                });
            }
            engine.restore(
                row.user_id,
                row.key,
                MetaEntry {
                    id: row.meta_id,
                    value: row.value,
                },
            );
        }

        debug!(path = %path.display(), entries = count, "Snapshot loaded");
        Ok(engine)
    }
}
