//! Per-channel mutable state and the map that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::attention::ChannelAttention;
use crate::cache::PendingCache;
use crate::config::EngineCfg;
use crate::gate::FrequencyState;

/// Everything the engine tracks for one group channel.
pub struct ChannelState {
    pub cache: PendingCache,
    pub attention: ChannelAttention,
    pub frequency: FrequencyState,
    /// True while a decision or generation call is running for this
    /// channel. Concurrent turns are cached instead of racing it.
    pub in_flight: bool,
    /// Set when attention mutates, cleared after a successful snapshot
    /// write. Quiet channels cost the flusher nothing.
    pub snapshot_dirty: bool,
}

impl ChannelState {
    pub fn new(cfg: &EngineCfg, now: DateTime<Utc>) -> Self {
        Self {
            cache: PendingCache::new(),
            attention: ChannelAttention::new(),
            frequency: FrequencyState::new(cfg.base_probability, now),
            in_flight: false,
            snapshot_dirty: false,
        }
    }
}

pub type ChannelHandle = Arc<Mutex<ChannelState>>;

/// Channel states keyed by `platform:channel`, created on first sight.
#[derive(Clone, Default)]
pub struct ChannelMap {
    inner: Arc<Mutex<HashMap<String, ChannelHandle>>>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed channels with attention state restored from a snapshot, so
    /// decay continues across restarts.
    pub async fn restore(&self, cfg: &EngineCfg, snapshots: HashMap<String, ChannelAttention>) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        for (key, attention) in snapshots {
            let mut state = ChannelState::new(cfg, now);
            state.attention = attention;
            inner.insert(key, Arc::new(Mutex::new(state)));
        }
    }

    pub async fn get_or_create(&self, key: &str, cfg: &EngineCfg) -> ChannelHandle {
        let mut inner = self.inner.lock().await;
        inner
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(ChannelState::new(cfg, Utc::now()))))
            .clone()
    }

    /// Current handles, for background sweeps.
    pub async fn handles(&self) -> Vec<(String, ChannelHandle)> {
        let inner = self.inner.lock().await;
        inner.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::UserProfile;

    #[tokio::test]
    async fn get_or_create_reuses_state() {
        let cfg = EngineCfg::default();
        let map = ChannelMap::new();

        let first = map.get_or_create("qq:42", &cfg).await;
        first.lock().await.in_flight = true;

        let again = map.get_or_create("qq:42", &cfg).await;
        assert!(again.lock().await.in_flight);
        assert_eq!(map.handles().await.len(), 1);
    }

    #[tokio::test]
    async fn restore_seeds_attention() {
        let cfg = EngineCfg::default();
        let map = ChannelMap::new();

        let mut attention = ChannelAttention::new();
        let mut profile = UserProfile::new("u1", "ada", Utc::now());
        profile.attention = 0.7;
        attention.insert(profile);
        map.restore(&cfg, HashMap::from([("qq:42".to_owned(), attention)])).await;

        let handle = map.get_or_create("qq:42", &cfg).await;
        let state = handle.lock().await;
        assert!(state.attention.get("u1").is_some());
        assert!(state.cache.is_empty());
    }
}
