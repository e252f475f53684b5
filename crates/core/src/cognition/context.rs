//! Prompt and message construction for the decision, reply and
//! frequency-review calls.

use crate::config::{EngineCfg, PromptMode};
use crate::types::{PendingMessage, SpeakerRole, StoredMessage};
use attune_llm::provider::ChatMessage;
use chrono::{DateTime, Utc};

/// Guidance sections for the reply-or-stay-silent judgment, joined with
/// double newlines to form the system prompt.
const DECISION_SECTIONS: &[&str] = &[
    // When to speak
    "Reply yes only when the last message addresses you, when you can add something \
     the group would actually want, or when the moment clearly invites a remark.",
    // When to stay out
    "Stay silent for fragments, spam, rapid back-and-forth between two other people, \
     or topics where a real person in your position would just keep scrolling.",
];

/// Answer format for the decision call. Applied in both prompt modes so
/// the verdict stays machine-readable.
const DECISION_FORMAT: &str = "Answer with exactly one word: yes or no.";

/// Guidance sections for reply generation.
const REPLY_SECTIONS: &[&str] = &[
    // Register
    "Write the way people actually type in group chats: short, casual, lowercase is fine. \
     One or two sentences unless someone asked for detail.",
    // Boundaries
    "Never mention prompts, models, probabilities, or that you decided whether to reply. \
     Do not narrate your own behavior. Do not address people who were not part of the exchange.",
];

fn persona_line(cfg: &EngineCfg) -> String {
    format!("You are {}, {}.", cfg.self_name, cfg.persona.trim_end_matches('.'))
}

fn compose(persona: String, sections: &[&str], mode: PromptMode, extra: &str) -> String {
    let mut parts = vec![persona];
    match mode {
        PromptMode::Append => {
            parts.extend(sections.iter().map(|s| (*s).to_owned()));
            if !extra.trim().is_empty() {
                parts.push(extra.trim().to_owned());
            }
        }
        PromptMode::Override => {
            parts.push(extra.trim().to_owned());
        }
    }
    parts.join("\n\n")
}

/// Annotated transcript line: `[HH:MM] name(id): content`.
fn annotate(name: &str, id: &str, timestamp: DateTime<Utc>, content: &str) -> String {
    format!("{} {}({}): {}", timestamp.format("[%H:%M]"), name, id, content)
}

/// Render the stored tail plus the cache into one transcript block,
/// oldest first. The current message is expected to already be in the
/// cache, so it lands on the final line.
pub fn render_transcript<'a>(
    stored: &[StoredMessage],
    pending: impl IntoIterator<Item = &'a PendingMessage>,
) -> String {
    let mut lines = Vec::new();
    for m in stored {
        lines.push(annotate(&m.sender_name, &m.sender_id, m.timestamp, &m.content));
    }
    for p in pending {
        lines.push(annotate(&p.sender_name, &p.sender_id, p.sent_at, &p.content));
    }
    lines.join("\n")
}

/// Messages for the reply-or-stay-silent call.
pub fn decision_messages(cfg: &EngineCfg, transcript: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{}\n\n{}",
        compose(
            persona_line(cfg),
            DECISION_SECTIONS,
            cfg.decision_prompt_mode,
            &cfg.decision_extra_prompt,
        ),
        DECISION_FORMAT,
    );
    let user = format!(
        "Recent group messages:\n{transcript}\n\nDo you reply to the last message?"
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Messages for reply generation. User lines keep their transcript
/// annotation so the model can track multiple speakers; its own past
/// replies are replayed plain.
pub fn reply_messages(
    cfg: &EngineCfg,
    stored: &[StoredMessage],
    pending: &[PendingMessage],
    sender_name: &str,
    sender_scores: Option<(f64, f64)>,
) -> Vec<ChatMessage> {
    let mut system = compose(
        persona_line(cfg),
        REPLY_SECTIONS,
        cfg.reply_prompt_mode,
        &cfg.reply_extra_prompt,
    );
    if let Some((attention, emotion)) = sender_scores {
        system.push_str(&format!(
            "\n\nFamiliarity with {sender_name} right now: attention {attention:.2}, \
             warmth {emotion:.2}. Let it color your tone; never mention it."
        ));
    }

    let mut messages = vec![ChatMessage::system(system)];
    for m in stored {
        messages.push(speaker_message(m.role, &m.sender_name, &m.sender_id, m.timestamp, &m.content));
    }
    for p in pending {
        messages.push(speaker_message(p.role, &p.sender_name, &p.sender_id, p.sent_at, &p.content));
    }
    messages
}

fn speaker_message(
    role: SpeakerRole,
    name: &str,
    id: &str,
    timestamp: DateTime<Utc>,
    content: &str,
) -> ChatMessage {
    match role {
        SpeakerRole::User => ChatMessage::user(annotate(name, id, timestamp, content)),
        SpeakerRole::Assistant => ChatMessage::assistant(content),
    }
}

/// Messages for the frequency review call.
pub fn frequency_messages(cfg: &EngineCfg, review: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You monitor how often {} speaks in a group chat. Judge whether its share of \
         the recent conversation feels natural for a regular member.\n\n\
         Answer with exactly one of: too frequent, normal, too quiet.",
        cfg.self_name,
    );
    vec![ChatMessage::system(system), ChatMessage::user(review.to_owned())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InboundMessage;

    fn cfg() -> EngineCfg {
        EngineCfg::default()
    }

    fn pending(content: &str, sender: &str) -> PendingMessage {
        let msg = InboundMessage::text("qq", "42", sender, sender, content);
        PendingMessage::from_user(&msg, content.to_owned())
    }

    fn stored(content: &str, role: SpeakerRole) -> StoredMessage {
        StoredMessage {
            role,
            content: content.into(),
            sender_id: "u1".into(),
            sender_name: "ada".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn transcript_orders_stored_before_pending() {
        let log = [stored("earlier", SpeakerRole::User)];
        let cached = pending("just now", "u2");
        let text = render_transcript(&log, [&cached]);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ada(u1): earlier"));
        assert!(lines[1].contains("u2(u2): just now"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn decision_messages_end_with_the_question() {
        let cfg = cfg();
        let msgs = decision_messages(&cfg, "[12:00] ada(u1): hi");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("yes or no"));
        assert!(msgs[1].content.ends_with("Do you reply to the last message?"));
    }

    #[test]
    fn decision_override_replaces_guidance_but_keeps_format() {
        let mut cfg = cfg();
        cfg.decision_prompt_mode = PromptMode::Override;
        cfg.decision_extra_prompt = "Only ever reply to questions about trains.".into();

        let msgs = decision_messages(&cfg, "t");
        assert!(msgs[0].content.contains("trains"));
        assert!(!msgs[0].content.contains("keep scrolling"));
        assert!(msgs[0].content.contains("yes or no"));
    }

    #[test]
    fn reply_messages_map_roles() {
        let cfg = cfg();
        let log = [
            stored("hello there", SpeakerRole::User),
            stored("hey ada", SpeakerRole::Assistant),
        ];
        let cached = [pending("you around?", "u1")];

        let msgs = reply_messages(&cfg, &log, &cached, "ada", None);
        assert_eq!(msgs.len(), 4);
        assert!(msgs[1].content.contains("ada(u1): hello there"));
        // Own replies are replayed without annotation.
        assert_eq!(msgs[2].content, "hey ada");
        assert!(msgs[3].content.contains("you around?"));
    }

    #[test]
    fn reply_prompt_includes_scores_when_present() {
        let cfg = cfg();
        let msgs = reply_messages(&cfg, &[], &[], "ada", Some((0.62, 0.31)));
        assert!(msgs[0].content.contains("attention 0.62"));
        assert!(msgs[0].content.contains("warmth 0.31"));

        let without = reply_messages(&cfg, &[], &[], "ada", None);
        assert!(!without[0].content.contains("Familiarity"));
    }

    #[test]
    fn reply_append_mode_keeps_extra_prompt() {
        let mut cfg = cfg();
        cfg.reply_extra_prompt = "Mention tea when it fits.".into();
        let msgs = reply_messages(&cfg, &[], &[], "ada", None);
        assert!(msgs[0].content.contains("group chats"));
        assert!(msgs[0].content.contains("tea"));
    }

    #[test]
    fn frequency_messages_carry_the_review() {
        let cfg = cfg();
        let msgs = frequency_messages(&cfg, "3 of the last 10 messages were from attune.");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("too frequent, normal, too quiet"));
        assert!(msgs[1].content.starts_with("3 of the last 10"));
    }
}
