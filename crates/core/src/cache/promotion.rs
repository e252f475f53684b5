//! Promotion of cached messages into the conversation log.
//!
//! When a reply goes out, everything in the channel's cache plus the
//! reply becomes one batch. The batch is deduplicated, appended as a
//! unit, and only a successful append clears the cache. On failure the
//! cache is left exactly as it was.

use super::pending::PendingCache;
use crate::store::{ConversationStore, StoreError};
use crate::types::{PendingMessage, StoredMessage};

/// Two messages with the same content and sender this close together in
/// time are considered one message.
pub const DEDUP_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionReport {
    pub promoted: usize,
    pub deduped: usize,
}

fn is_duplicate(candidate: &StoredMessage, existing: &StoredMessage) -> bool {
    candidate.content == existing.content
        && candidate.sender_id == existing.sender_id
        && (candidate.timestamp - existing.timestamp).num_seconds().abs() <= DEDUP_WINDOW_SECS
}

/// Promote the whole cache plus `reply` into the conversation log.
///
/// `recent` is the tail of the stored log, used to drop entries that were
/// already persisted through another path.
pub async fn promote(
    cache: &mut PendingCache,
    reply: &PendingMessage,
    recent: &[StoredMessage],
    store: &dyn ConversationStore,
    channel_key: &str,
) -> Result<PromotionReport, StoreError> {
    let mut batch: Vec<StoredMessage> = Vec::with_capacity(cache.len() + 1);
    let mut deduped = 0usize;

    for pending in cache.iter().map(PendingMessage::to_stored).chain([reply.to_stored()]) {
        let seen = recent.iter().chain(batch.iter()).any(|m| is_duplicate(&pending, m));
        if seen {
            deduped += 1;
        } else {
            batch.push(pending);
        }
    }

    store.append_batch(channel_key, &batch).await?;
    cache.clear();

    Ok(PromotionReport { promoted: batch.len(), deduped })
}
