//! Per-channel frequency governor.
//!
//! The governor keeps a window of recent traffic and periodically asks the
//! model whether the engine is talking too much or too little, then nudges
//! the channel's base probability accordingly. The window resets after
//! every review regardless of the verdict.

use crate::config::EngineCfg;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Multiplier applied when the model judges output too frequent.
pub const TOO_FREQUENT_FACTOR: f64 = 0.85;

/// Multiplier applied when the model judges output too sparse.
pub const TOO_SPARSE_FACTOR: f64 = 1.15;

/// Most recent traffic samples kept for the review prompt.
const SAMPLE_CAP: usize = 20;

/// Per-sample preview length in characters.
const PREVIEW_CHARS: usize = 80;

/// A verdict reply longer than this is treated as noise.
const VERDICT_MAX_CHARS: usize = 100;

/// Model verdict about recent reply frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyVerdict {
    TooFrequent,
    Normal,
    TooSparse,
}

impl FrequencyVerdict {
    /// Parse a model reply. Returns `None` when the reply is over-long or
    /// matches nothing; the caller still resets the window.
    pub fn parse(reply: &str) -> Option<Self> {
        if reply.chars().count() > VERDICT_MAX_CHARS {
            return None;
        }
        let lower = reply.to_lowercase();
        if lower.contains("quiet") || lower.contains("sparse") || lower.contains("infrequent") {
            return Some(Self::TooSparse);
        }
        if lower.contains("frequent") {
            return Some(Self::TooFrequent);
        }
        if lower.contains("normal") {
            return Some(Self::Normal);
        }
        None
    }
}

/// One traffic sample for the review prompt.
#[derive(Debug, Clone)]
struct Sample {
    speaker: String,
    preview: String,
}

/// Governor state for one channel.
#[derive(Debug, Clone)]
pub struct FrequencyState {
    /// The governed base probability the gate draws against.
    pub current_probability: f64,
    window_started_at: DateTime<Utc>,
    message_count: usize,
    reply_count: usize,
    samples: VecDeque<Sample>,
}

impl FrequencyState {
    pub fn new(base: f64, now: DateTime<Utc>) -> Self {
        Self {
            current_probability: base,
            window_started_at: now,
            message_count: 0,
            reply_count: 0,
            samples: VecDeque::new(),
        }
    }

    /// Record one message seen on the channel.
    pub fn observe(&mut self, speaker: &str, is_self: bool, content: &str) {
        self.message_count += 1;
        if is_self {
            self.reply_count += 1;
        }
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        self.samples.push_back(Sample { speaker: speaker.to_owned(), preview });
        while self.samples.len() > SAMPLE_CAP {
            self.samples.pop_front();
        }
    }

    /// Whether a review should run now.
    pub fn due(&self, cfg: &EngineCfg, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.window_started_at).num_seconds();
        elapsed >= cfg.frequency_interval_secs as i64 && self.message_count >= cfg.frequency_min_count
    }

    /// Render the window for the review prompt.
    pub fn review_text(&self, self_name: &str) -> String {
        let mut out = format!(
            "{} of the last {} messages were from {}.\n",
            self.reply_count, self.message_count, self_name
        );
        for s in &self.samples {
            out.push_str(&format!("{}: {}\n", s.speaker, s.preview));
        }
        out
    }

    /// Apply a verdict (or lack of one) and start a fresh window.
    pub fn apply(&mut self, verdict: Option<FrequencyVerdict>, cfg: &EngineCfg, now: DateTime<Utc>) {
        match verdict {
            Some(FrequencyVerdict::TooFrequent) => {
                self.current_probability *= TOO_FREQUENT_FACTOR;
            }
            Some(FrequencyVerdict::TooSparse) => {
                self.current_probability *= TOO_SPARSE_FACTOR;
            }
            Some(FrequencyVerdict::Normal) | None => {}
        }
        self.current_probability =
            self.current_probability.clamp(cfg.probability_min, cfg.probability_max);
        self.window_started_at = now;
        self.message_count = 0;
        self.reply_count = 0;
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> EngineCfg {
        EngineCfg::default()
    }

    #[test]
    fn not_due_before_interval() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        for i in 0..10 {
            state.observe(&format!("u{i}"), false, "hello");
        }
        assert!(!state.due(&cfg, now + Duration::seconds(10)));
        assert!(state.due(&cfg, now + Duration::seconds(180)));
    }

    #[test]
    fn not_due_below_min_count() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        for i in 0..7 {
            state.observe(&format!("u{i}"), false, "hello");
        }
        assert!(!state.due(&cfg, now + Duration::seconds(300)));
        state.observe("u8", false, "one more");
        assert!(state.due(&cfg, now + Duration::seconds(300)));
    }

    #[test]
    fn too_frequent_scales_down() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.2, now);
        state.apply(Some(FrequencyVerdict::TooFrequent), &cfg, now);
        assert!((state.current_probability - 0.17).abs() < 1e-9);
    }

    #[test]
    fn too_sparse_scales_up_with_ceiling() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.9, now);
        state.apply(Some(FrequencyVerdict::TooSparse), &cfg, now);
        assert!((state.current_probability - cfg.probability_max).abs() < 1e-9);
    }

    #[test]
    fn window_resets_even_on_normal_verdict() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        for i in 0..10 {
            state.observe(&format!("u{i}"), false, "hello");
        }
        state.apply(Some(FrequencyVerdict::Normal), &cfg, now + Duration::seconds(200));

        assert!((state.current_probability - 0.3).abs() < 1e-9);
        assert!(!state.due(&cfg, now + Duration::seconds(220)));
    }

    #[test]
    fn window_resets_when_verdict_unparseable() {
        let cfg = cfg();
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        for i in 0..10 {
            state.observe(&format!("u{i}"), false, "hello");
        }
        state.apply(None, &cfg, now + Duration::seconds(200));
        assert!(!state.due(&cfg, now + Duration::seconds(220)));
    }

    #[test]
    fn samples_are_capped_and_truncated() {
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        let long = "x".repeat(500);
        for i in 0..30 {
            state.observe(&format!("u{i}"), false, &long);
        }
        let text = state.review_text("attune");
        // 20 sample lines plus the summary line
        assert_eq!(text.lines().count(), 21);
        assert!(text.lines().nth(1).unwrap().chars().count() <= 80 + "u10: ".len());
    }

    #[test]
    fn review_counts_own_replies() {
        let now = Utc::now();
        let mut state = FrequencyState::new(0.3, now);
        state.observe("ada", false, "hi");
        state.observe("attune", true, "hello ada");
        state.observe("ada", false, "how are you");
        let text = state.review_text("attune");
        assert!(text.starts_with("1 of the last 3 messages were from attune."));
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!(FrequencyVerdict::parse("too frequent"), Some(FrequencyVerdict::TooFrequent));
        assert_eq!(FrequencyVerdict::parse("Normal."), Some(FrequencyVerdict::Normal));
        assert_eq!(FrequencyVerdict::parse("too quiet"), Some(FrequencyVerdict::TooSparse));
        assert_eq!(FrequencyVerdict::parse("a bit sparse lately"), Some(FrequencyVerdict::TooSparse));
        assert_eq!(FrequencyVerdict::parse("infrequent"), Some(FrequencyVerdict::TooSparse));
        assert_eq!(FrequencyVerdict::parse(""), None);
        let rambling = "well considering the volume of chat and the genre of discussion I would \
                        say the reply rate could be considered frequent or maybe normal depending";
        assert_eq!(FrequencyVerdict::parse(rambling), None);
    }
}
