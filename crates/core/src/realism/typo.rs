//! Occasional typos for outgoing replies.
//!
//! A reply that opts in gets up to two characters swapped for a
//! keyboard neighbour, never inside code spans or URLs. Probabilities
//! come from config so the whole thing can be switched off.

use crate::config::EngineCfg;
use rand::Rng;

/// Hard cap on substitutions per reply.
pub const MAX_TYPOS: usize = 2;

/// Fixed substitution table: QWERTY neighbours for lowercase letters.
/// Characters without an entry are never touched.
fn lookalikes(c: char) -> Option<&'static [char]> {
    let cands: &'static [char] = match c {
        'a' => &['s', 'q', 'z'],
        'b' => &['v', 'n', 'g'],
        'c' => &['x', 'v', 'd'],
        'd' => &['s', 'f', 'e'],
        'e' => &['w', 'r', 'd'],
        'f' => &['d', 'g', 'r'],
        'g' => &['f', 'h', 't'],
        'h' => &['g', 'j', 'y'],
        'i' => &['u', 'o', 'k'],
        'j' => &['h', 'k', 'u'],
        'k' => &['j', 'l', 'i'],
        'l' => &['k', 'o'],
        'm' => &['n', 'j'],
        'n' => &['b', 'm', 'h'],
        'o' => &['i', 'p', 'l'],
        'p' => &['o', 'l'],
        'q' => &['w', 'a'],
        'r' => &['e', 't', 'f'],
        's' => &['a', 'd', 'w'],
        't' => &['r', 'y', 'g'],
        'u' => &['y', 'i', 'j'],
        'v' => &['c', 'b', 'f'],
        'w' => &['q', 'e', 's'],
        'x' => &['z', 'c', 's'],
        'y' => &['t', 'u', 'h'],
        'z' => &['x', 'a', 's'],
        _ => return None,
    };
    Some(cands)
}

/// Char index ranges that must not be touched: backtick code spans and
/// URLs. An unterminated backtick protects through to the end.
fn protected_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let n = chars.len();
    let mut i = 0;
    while i < n {
        if chars[i] == '`' {
            let close = chars[i + 1..].iter().position(|&c| c == '`');
            let end = close.map(|off| i + 1 + off + 1).unwrap_or(n);
            spans.push((i, end));
            i = end;
            continue;
        }
        if is_url_start(chars, i) {
            let end = chars[i..]
                .iter()
                .position(|c| c.is_whitespace())
                .map(|off| i + off)
                .unwrap_or(n);
            spans.push((i, end));
            i = end;
            continue;
        }
        i += 1;
    }
    spans
}

fn is_url_start(chars: &[char], i: usize) -> bool {
    let rest: String = chars[i..].iter().take(8).collect();
    (rest.starts_with("http://") || rest.starts_with("https://"))
        && (i == 0 || chars[i - 1].is_whitespace())
}

fn in_span(spans: &[(usize, usize)], i: usize) -> bool {
    spans.iter().any(|&(s, e)| i >= s && i < e)
}

/// Maybe introduce typos into `text`. Returns the text unchanged when the
/// feature is off, the reply is short, or the activation draw fails. When
/// active, each eligible character is independently replaced with
/// probability `typo_per_char` by a neighbour from the fixed table, up to
/// [`MAX_TYPOS`] per reply.
pub fn humanize(text: &str, cfg: &EngineCfg, rng: &mut impl Rng) -> String {
    if !cfg.typo_enabled {
        return text.to_owned();
    }
    let mut chars: Vec<char> = text.chars().collect();
    if chars.len() < cfg.typo_min_chars {
        return text.to_owned();
    }
    if !rng.gen_bool(cfg.typo_activation.clamp(0.0, 1.0)) {
        return text.to_owned();
    }

    let spans = protected_spans(&chars);
    let mut applied = 0;
    for i in 0..chars.len() {
        if applied >= MAX_TYPOS {
            break;
        }
        let Some(cands) = lookalikes(chars[i]) else {
            continue;
        };
        if in_span(&spans, i) {
            continue;
        }
        if rng.gen_bool(cfg.typo_per_char.clamp(0.0, 1.0)) {
            chars[i] = cands[rng.gen_range(0..cands.len())];
            applied += 1;
        }
    }
    chars.into_iter().collect()
}
