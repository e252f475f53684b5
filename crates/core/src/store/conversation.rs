//! Conversation log storage.
//!
//! The promoted history for each channel, append-only. One JSONL file per
//! channel in the file-backed implementation; the in-memory one backs
//! tests and ephemeral runs.

use super::{StoreError, sanitize_key};
use crate::types::StoredMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a batch as one unit. Either the whole batch lands or the
    /// call errors with the log unchanged from the caller's view.
    async fn append_batch(
        &self,
        channel_key: &str,
        messages: &[StoredMessage],
    ) -> Result<(), StoreError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent(&self, channel_key: &str, limit: usize)
    -> Result<Vec<StoredMessage>, StoreError>;
}

#[derive(Default)]
pub struct MemoryConversationStore {
    channels: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append_batch(
        &self,
        channel_key: &str,
        messages: &[StoredMessage],
    ) -> Result<(), StoreError> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel_key.to_owned())
            .or_default()
            .extend(messages.iter().cloned());
        Ok(())
    }

    async fn recent(
        &self,
        channel_key: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let channels = self.channels.lock().await;
        let log = match channels.get(channel_key) {
            Some(log) => log,
            None => return Ok(Vec::new()),
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}

/// One JSONL file per channel under `root`.
pub struct JsonlConversationStore {
    root: PathBuf,
}

impl JsonlConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, channel_key: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", sanitize_key(channel_key)))
    }
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn append_batch(
        &self,
        channel_key: &str,
        messages: &[StoredMessage],
    ) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let mut buf = String::new();
        for msg in messages {
            buf.push_str(&serde_json::to_string(msg)?);
            buf.push('\n');
        }
        // Single write in append mode keeps the batch contiguous.
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(channel_key))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(
        &self,
        channel_key: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let path = self.path_for(channel_key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_tail(&path, limit).await?)
    }
}

async fn read_tail(path: &Path, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut messages = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredMessage>(line) {
            Ok(msg) => messages.push(msg),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed log line");
            }
        }
    }
    let start = messages.len().saturating_sub(limit);
    Ok(messages.split_off(start))
}
