//! Image linearization: turning image segments into text the rest of the
//! pipeline can treat like any other content.

use crate::config::{EngineCfg, ImageDegrade, ImageScope};
use crate::types::{InboundMessage, Segment, clean_text};
use attune_llm::provider::LlmProvider;
use std::time::Duration;

/// Placeholder for an image that was kept but not described.
const IMAGE_MARKER: &str = "[image]";

fn degrade(parts: &mut Vec<String>, mode: ImageDegrade) {
    if mode == ImageDegrade::Strip {
        parts.push(IMAGE_MARKER.to_owned());
    }
}

/// Produce the message's cacheable text. Text segments pass through;
/// each image either becomes a bracketed description, a bare marker, or
/// nothing, depending on config and how the description call goes. Every
/// image gets its own timeout so one stuck call cannot starve the rest.
pub async fn linearize(
    msg: &InboundMessage,
    cfg: &EngineCfg,
    provider: Option<&dyn LlmProvider>,
) -> String {
    let in_scope = match cfg.image_scope {
        ImageScope::All => true,
        ImageScope::MentionOnly => msg.mentions_self,
    };
    let timeout = Duration::from_secs(cfg.vision_timeout_secs);

    let mut parts: Vec<String> = Vec::with_capacity(msg.segments.len());
    for segment in &msg.segments {
        match segment {
            Segment::Text { text } => parts.push(text.clone()),
            Segment::Image { url } => {
                let provider = match provider {
                    Some(p) if cfg.vision_enabled && in_scope => p,
                    _ => {
                        degrade(&mut parts, cfg.image_degrade);
                        continue;
                    }
                };
                let call = provider.describe_image(url.clone(), cfg.image_prompt.clone());
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(desc)) if !desc.trim().is_empty() => {
                        parts.push(format!("[image: {}]", desc.trim()));
                    }
                    Ok(Ok(_)) => {
                        tracing::debug!(url = %url, "empty image description");
                        degrade(&mut parts, cfg.image_degrade);
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(url = %url, error = %e, "image description failed");
                        degrade(&mut parts, cfg.image_degrade);
                    }
                    Err(_) => {
                        tracing::debug!(url = %url, "image description timed out");
                        degrade(&mut parts, cfg.image_degrade);
                    }
                }
            }
        }
    }
    clean_text(&parts.join(" "))
}
