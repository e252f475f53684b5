//! Simulated typing latency before a reply is sent.

use crate::config::EngineCfg;
use rand::Rng;
use std::time::Duration;

/// Jitter applied around the base delay, as a fraction of it.
const TYPING_JITTER: f64 = 0.3;

/// Delay to wait before sending a reply of `reply` characters, or `None`
/// when the feature is off or the reply is too short to bother.
pub fn delay(reply: &str, cfg: &EngineCfg, rng: &mut impl Rng) -> Option<Duration> {
    if !cfg.typing_enabled {
        return None;
    }
    let chars = reply.chars().count();
    if chars <= cfg.typing_skip_under_chars {
        return None;
    }
    let cps = cfg.typing_chars_per_sec.max(0.1);
    let base = chars as f64 / cps;
    let jittered = base * rng.gen_range(1.0 - TYPING_JITTER..=1.0 + TYPING_JITTER);
    let clamped = jittered.clamp(cfg.typing_min_delay_secs, cfg.typing_max_delay_secs);
    Some(Duration::from_secs_f64(clamped))
}
