//! Cheap lexical screen, the first gate stage. Anything dropped here
//! never touches state or a model.

use crate::config::EngineCfg;
use crate::types::{DropReason, InboundMessage};

/// First matching keyword, case-insensitive substring on pre-lowercased text.
pub(super) fn match_keyword<'a>(text_lower: &str, keywords: &'a [String]) -> Option<&'a str> {
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .find(|k| text_lower.contains(&k.to_lowercase()))
        .map(String::as_str)
}

/// Decide whether a message is discarded outright. `None` means it
/// continues into the pipeline.
pub fn screen(msg: &InboundMessage, cfg: &EngineCfg) -> Option<DropReason> {
    if !cfg.enabled_channels.iter().any(|c| *c == msg.channel_key()) {
        return Some(DropReason::ChannelNotEnabled);
    }
    if msg.sender_id == cfg.self_id {
        return Some(DropReason::OwnMessage);
    }
    let text = msg.plain_text();
    if text.is_empty() && !msg.has_images() {
        return Some(DropReason::EmptyContent);
    }
    if let Some(hit) = match_keyword(&text.to_lowercase(), &cfg.blacklist_keywords) {
        tracing::debug!(keyword = %hit, sender = %msg.sender_id, "blacklist hit");
        return Some(DropReason::BlacklistedKeyword);
    }
    None
}
