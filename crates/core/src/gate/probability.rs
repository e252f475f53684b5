//! Second gate stage: triggers and the probability draw.

use super::lexical::match_keyword;
use crate::attention::ChannelAttention;
use crate::config::EngineCfg;
use crate::types::InboundMessage;
use chrono::{DateTime, Utc};
use rand::Rng;

/// What let a message bypass the probability draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Mention,
    Keyword(String),
}

/// Outcome of the gate for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    /// Whether the message goes on to the model decision stage.
    pub engage: bool,
    /// The probability that was in effect for the draw. Triggered
    /// messages report 1.0.
    pub probability: f64,
    pub trigger: Option<Trigger>,
}

/// A mention or trigger keyword makes the reply consideration mandatory.
pub fn find_trigger(msg: &InboundMessage, cfg: &EngineCfg) -> Option<Trigger> {
    if msg.mentions_self {
        return Some(Trigger::Mention);
    }
    match_keyword(&msg.plain_text().to_lowercase(), &cfg.trigger_keywords)
        .map(|k| Trigger::Keyword(k.to_owned()))
}

/// Run the gate: trigger check first, otherwise a Bernoulli draw at the
/// attention-adjusted probability. `governed_base` is the channel's
/// current frequency-governed base probability.
pub fn evaluate(
    msg: &InboundMessage,
    cfg: &EngineCfg,
    attention: &ChannelAttention,
    governed_base: f64,
    rng: &mut impl Rng,
    now: DateTime<Utc>,
) -> GateDecision {
    if let Some(trigger) = find_trigger(msg, cfg) {
        return GateDecision { engage: true, probability: 1.0, trigger: Some(trigger) };
    }

    let probability = if cfg.attention_enabled {
        attention.adjust_probability(&msg.sender_id, governed_base, cfg, now)
    } else {
        governed_base.clamp(cfg.probability_min, cfg.probability_max)
    };
    let engage = rng.gen_bool(probability);
    GateDecision { engage, probability, trigger: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn cfg() -> EngineCfg {
        let mut cfg = EngineCfg::default();
        cfg.enabled_channels = vec!["qq:42".into()];
        cfg
    }

    fn msg(content: &str) -> InboundMessage {
        InboundMessage::text("qq", "42", "u1", "ada", content)
    }

    #[test]
    fn mention_bypasses_the_draw() {
        let cfg = cfg();
        let mut m = msg("hey you there?");
        m.mentions_self = true;
        let mut rng = SmallRng::seed_from_u64(42);
        let d = evaluate(&m, &cfg, &ChannelAttention::new(), 0.0, &mut rng, Utc::now());
        assert!(d.engage);
        assert_eq!(d.trigger, Some(Trigger::Mention));
        assert!((d.probability - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trigger_keyword_bypasses_the_draw() {
        let mut cfg = cfg();
        cfg.trigger_keywords = vec!["lunch".into()];
        let mut rng = SmallRng::seed_from_u64(42);
        let d = evaluate(&msg("anyone up for Lunch?"), &cfg, &ChannelAttention::new(), 0.0, &mut rng, Utc::now());
        assert!(d.engage);
        assert_eq!(d.trigger, Some(Trigger::Keyword("lunch".into())));
    }

    #[test]
    fn zero_probability_never_engages() {
        let mut cfg = cfg();
        cfg.probability_min = 0.0;
        cfg.attention_enabled = false;
        let mut rng = SmallRng::seed_from_u64(42);
        let m = msg("hello");
        for _ in 0..10_000 {
            let d = evaluate(&m, &cfg, &ChannelAttention::new(), 0.0, &mut rng, Utc::now());
            assert!(!d.engage);
        }
    }

    #[test]
    fn unit_probability_always_engages() {
        let mut cfg = cfg();
        cfg.probability_max = 1.0;
        cfg.attention_enabled = false;
        let mut rng = SmallRng::seed_from_u64(42);
        let m = msg("hello");
        for _ in 0..10_000 {
            let d = evaluate(&m, &cfg, &ChannelAttention::new(), 1.0, &mut rng, Utc::now());
            assert!(d.engage);
        }
    }

    #[test]
    fn draw_frequency_tracks_probability() {
        let mut cfg = cfg();
        cfg.attention_enabled = false;
        let mut rng = SmallRng::seed_from_u64(7);
        let m = msg("hello");
        let mut engaged = 0u32;
        for _ in 0..1000 {
            if evaluate(&m, &cfg, &ChannelAttention::new(), 0.3, &mut rng, Utc::now()).engage {
                engaged += 1;
            }
        }
        let fraction = engaged as f64 / 1000.0;
        assert!((fraction - 0.3).abs() < 0.05, "fraction {fraction}");
    }

    #[test]
    fn attention_raises_the_draw_probability() {
        let cfg = cfg();
        let now = Utc::now();
        let mut attention = ChannelAttention::new();
        let mut profile = crate::attention::UserProfile::new("u1", "ada", now);
        profile.attention = 1.0;
        attention.insert(profile);

        let mut rng = SmallRng::seed_from_u64(42);
        let d = evaluate(&msg("hi"), &cfg, &attention, 0.3, &mut rng, now);
        // 0.3 * (1 + 1.0 * 0.5) = 0.45
        assert!((d.probability - 0.45).abs() < 1e-9);
    }

    #[test]
    fn disabled_attention_uses_clamped_base() {
        let mut cfg = cfg();
        cfg.attention_enabled = false;
        let mut rng = SmallRng::seed_from_u64(42);
        let d = evaluate(&msg("hi"), &cfg, &ChannelAttention::new(), 0.01, &mut rng, Utc::now());
        assert!((d.probability - cfg.probability_min).abs() < 1e-9);
    }
}
