//! Per-user attention and emotion scores with half-life decay.
//!
//! Scores are stored with the timestamp of their last update and decayed
//! lazily on read, so no periodic tick has to touch every profile.

use crate::config::EngineCfg;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Profiles whose decayed attention falls below this are eligible for
/// cleanup once their retention window has passed.
pub const ATTENTION_FLOOR: f64 = 0.05;

/// Fixed emotion contribution to the probability adjustment.
pub const EMOTION_GAIN: f64 = 0.3;

/// Exponential half-life decay: `value * 2^(-elapsed / halflife)`.
fn decay(value: f64, elapsed_secs: f64, halflife_secs: f64) -> f64 {
    if halflife_secs <= 0.0 {
        return value;
    }
    // Clock skew can make elapsed negative; never amplify.
    let elapsed = elapsed_secs.max(0.0);
    value * 2f64.powf(-elapsed / halflife_secs)
}

/// Decay state for one user in one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub user_name: String,
    pub attention: f64,
    pub emotion: f64,
    pub attention_updated_at: DateTime<Utc>,
    pub emotion_updated_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            attention: 0.0,
            emotion: 0.0,
            attention_updated_at: now,
            emotion_updated_at: now,
            last_interaction: now,
        }
    }

    /// Attention decayed to `now`.
    pub fn attention_at(&self, now: DateTime<Utc>, cfg: &EngineCfg) -> f64 {
        let elapsed = (now - self.attention_updated_at).num_milliseconds() as f64 / 1000.0;
        decay(self.attention, elapsed, cfg.attention_halflife_secs)
    }

    /// Emotion decayed to `now`.
    pub fn emotion_at(&self, now: DateTime<Utc>, cfg: &EngineCfg) -> f64 {
        let elapsed = (now - self.emotion_updated_at).num_milliseconds() as f64 / 1000.0;
        decay(self.emotion, elapsed, cfg.emotion_halflife_secs)
    }
}

/// All user profiles for one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAttention {
    users: HashMap<String, UserProfile>,
}

impl ChannelAttention {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.get(user_id)
    }

    pub fn insert(&mut self, profile: UserProfile) {
        self.users.insert(profile.user_id.clone(), profile);
    }

    /// Record that a user just spoke. Only refreshes an existing profile;
    /// profiles are created by reinforcement, not by lurking. Returns
    /// whether anything changed.
    pub fn touch(&mut self, user_id: &str, user_name: &str, now: DateTime<Utc>) -> bool {
        match self.users.get_mut(user_id) {
            Some(profile) => {
                profile.last_interaction = now;
                if profile.user_name != user_name {
                    profile.user_name = user_name.to_owned();
                }
                true
            }
            None => false,
        }
    }

    /// Apply reinforcement after the engine replied to `responded_id`.
    ///
    /// The responded user's attention and emotion step up; every other
    /// known user's attention steps down. All attention values are decayed
    /// to `now` before the step is applied.
    pub fn reinforce(
        &mut self,
        responded_id: &str,
        responded_name: &str,
        cfg: &EngineCfg,
        now: DateTime<Utc>,
    ) {
        self.users
            .entry(responded_id.to_owned())
            .or_insert_with(|| UserProfile::new(responded_id, responded_name, now));

        for profile in self.users.values_mut() {
            let attention = {
                let elapsed =
                    (now - profile.attention_updated_at).num_milliseconds() as f64 / 1000.0;
                decay(profile.attention, elapsed, cfg.attention_halflife_secs)
            };
            if profile.user_id == responded_id {
                profile.attention = (attention + cfg.attention_boost_step).min(1.0);
                let emotion = {
                    let elapsed =
                        (now - profile.emotion_updated_at).num_milliseconds() as f64 / 1000.0;
                    decay(profile.emotion, elapsed, cfg.emotion_halflife_secs)
                };
                profile.emotion = (emotion + cfg.emotion_step).min(1.0);
                profile.emotion_updated_at = now;
                profile.last_interaction = now;
            } else {
                profile.attention = (attention - cfg.attention_decrease_step).max(0.0);
            }
            profile.attention_updated_at = now;
        }

        self.enforce_capacity(cfg, now);
    }

    /// Evict lowest-attention profiles until the map fits the cap.
    /// Ties break toward the user seen longest ago.
    fn enforce_capacity(&mut self, cfg: &EngineCfg, now: DateTime<Utc>) {
        if self.users.len() <= cfg.attention_max_users {
            return;
        }
        let mut ranked: Vec<(String, f64, DateTime<Utc>)> = self
            .users
            .values()
            .map(|p| (p.user_id.clone(), p.attention_at(now, cfg), p.last_interaction))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        let excess = self.users.len() - cfg.attention_max_users;
        for (user_id, _, _) in ranked.into_iter().take(excess) {
            self.users.remove(&user_id);
        }
    }

    /// Remove profiles that are both past the retention window and below
    /// the attention floor. Returns how many were removed.
    pub fn cleanup(&mut self, cfg: &EngineCfg, now: DateTime<Utc>) -> usize {
        let window = cfg.retention_window_secs();
        let before = self.users.len();
        self.users.retain(|_, p| {
            let idle = (now - p.last_interaction).num_milliseconds() as f64 / 1000.0;
            idle <= window || p.attention_at(now, cfg) >= ATTENTION_FLOOR
        });
        before - self.users.len()
    }

    /// Decayed (attention, emotion) for a user, if tracked.
    pub fn scores(&self, user_id: &str, cfg: &EngineCfg, now: DateTime<Utc>) -> Option<(f64, f64)> {
        self.users
            .get(user_id)
            .map(|p| (p.attention_at(now, cfg), p.emotion_at(now, cfg)))
    }

    /// Reply probability for a sender, scaled by their decayed scores and
    /// clipped to the configured band.
    pub fn adjust_probability(
        &self,
        user_id: &str,
        base: f64,
        cfg: &EngineCfg,
        now: DateTime<Utc>,
    ) -> f64 {
        let (attention, emotion) = self.scores(user_id, cfg, now).unwrap_or((0.0, 0.0));
        let adjusted =
            base * (1.0 + attention * cfg.attention_probability_gain) * (1.0 + emotion * EMOTION_GAIN);
        adjusted.clamp(cfg.probability_min, cfg.probability_max)
    }
}
