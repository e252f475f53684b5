//! Snapshot persistence for attention state.
//!
//! The whole per-channel map is written as one JSON document through a
//! temp file rename, so a crash mid-flush leaves the previous snapshot
//! intact.

use super::model::ChannelAttention;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Write all channel attention state to `path` atomically.
pub fn save(
    path: &Path,
    channels: &HashMap<String, ChannelAttention>,
) -> Result<(), SnapshotError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec_pretty(channels)?;
    let dir = parent.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| SnapshotError::Io(e.error))?;
    Ok(())
}

/// Read a snapshot back. A missing file is an empty map.
pub fn load(path: &Path) -> Result<HashMap<String, ChannelAttention>, SnapshotError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
