//! Short-term message cache for one channel.
//!
//! Holds messages the engine has seen but not yet promoted into the
//! conversation log. Bounded by capacity and TTL; anything this cache
//! gives up is handed back to the caller so it can be preserved in the
//! fallback log.

use crate::types::PendingMessage;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct PendingCache {
    entries: VecDeque<PendingMessage>,
}

impl PendingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.entries.iter()
    }

    /// Append a message, evicting from the front to stay within
    /// `capacity`. Evicted entries are returned oldest first.
    pub fn append(&mut self, msg: PendingMessage, capacity: usize) -> Vec<PendingMessage> {
        self.entries.push_back(msg);
        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            if let Some(old) = self.entries.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Remove entries older than `ttl_secs` and return them.
    pub fn sweep_expired(&mut self, ttl_secs: u64, now: DateTime<Utc>) -> Vec<PendingMessage> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            let age = (now - e.cached_at).num_seconds();
            if age > ttl_secs as i64 {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Flag an entry as already written to the fallback log.
    pub fn mark_fallback_persisted(&mut self, id: Uuid) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.fallback_persisted = true;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
