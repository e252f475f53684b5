//! Fallback log for messages that never made it into a conversation log:
//! retained without a reply, evicted from the cache, or expired.
//!
//! Capped per channel so an idle deployment cannot grow it forever.

use super::{StoreError, sanitize_key};
use crate::types::StoredMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Most fallback records kept per channel; oldest are dropped beyond this.
pub const FALLBACK_CAP: usize = 200;

/// Why a message landed in the fallback log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackReason {
    /// Kept in cache without a reply; persisted so a crash cannot lose it.
    Retained,
    /// Pushed out of the cache by capacity.
    Evicted,
    /// Aged out of the cache by TTL.
    Expired,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retained => "retained",
            Self::Evicted => "evicted",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub message: StoredMessage,
    pub reason: FallbackReason,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait FallbackStore: Send + Sync {
    async fn record(
        &self,
        channel_key: &str,
        message: &StoredMessage,
        reason: FallbackReason,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryFallbackStore {
    channels: Mutex<HashMap<String, Vec<FallbackRecord>>>,
}

impl MemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records for a channel, oldest first.
    pub async fn records(&self, channel_key: &str) -> Vec<FallbackRecord> {
        self.channels.lock().await.get(channel_key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl FallbackStore for MemoryFallbackStore {
    async fn record(
        &self,
        channel_key: &str,
        message: &StoredMessage,
        reason: FallbackReason,
    ) -> Result<(), StoreError> {
        let mut channels = self.channels.lock().await;
        let log = channels.entry(channel_key.to_owned()).or_default();
        log.push(FallbackRecord { message: message.clone(), reason, recorded_at: Utc::now() });
        if log.len() > FALLBACK_CAP {
            let excess = log.len() - FALLBACK_CAP;
            log.drain(..excess);
        }
        Ok(())
    }
}

/// One JSONL file per channel under `root`, rewritten on each record to
/// enforce the cap. Files stay small, so the rewrite is cheap.
pub struct JsonlFallbackStore {
    root: PathBuf,
}

impl JsonlFallbackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, channel_key: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", sanitize_key(channel_key)))
    }
}

#[async_trait]
impl FallbackStore for JsonlFallbackStore {
    async fn record(
        &self,
        channel_key: &str,
        message: &StoredMessage,
        reason: FallbackReason,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(channel_key);

        let mut records: Vec<FallbackRecord> = Vec::new();
        if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str(line) {
                    Ok(rec) => records.push(rec),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping malformed fallback line");
                    }
                }
            }
        }
        records.push(FallbackRecord {
            message: message.clone(),
            reason,
            recorded_at: Utc::now(),
        });
        if records.len() > FALLBACK_CAP {
            let excess = records.len() - FALLBACK_CAP;
            records.drain(..excess);
        }

        let mut buf = String::new();
        for rec in &records {
            buf.push_str(&serde_json::to_string(rec)?);
            buf.push('\n');
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(buf.as_bytes())?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
