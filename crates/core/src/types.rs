use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One segment of an inbound message. Platforms deliver mixed chains of
/// text and images; everything else is dropped at the adapter edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Image { url: String },
}

/// A group message entering the engine, already normalized by the
/// platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub platform: String,
    pub channel: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub segments: Vec<Segment>,
    /// True when the message @-mentions the bot or uses its wake word.
    pub mentions_self: bool,
}

impl InboundMessage {
    pub fn text(
        platform: impl Into<String>,
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform: platform.into(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            timestamp: Utc::now(),
            segments: vec![Segment::Text { text: content.into() }],
            mentions_self: false,
        }
    }

    /// Composite key identifying the conversation this message belongs to.
    pub fn channel_key(&self) -> String {
        format!("{}:{}", self.platform, self.channel)
    }

    /// Text content with image segments removed, control characters
    /// stripped and whitespace runs collapsed.
    pub fn plain_text(&self) -> String {
        let raw: Vec<&str> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text.as_str()),
                Segment::Image { .. } => None,
            })
            .collect();
        clean_text(&raw.join(" "))
    }

    pub fn has_images(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Image { .. }))
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Image { url } => Some(url.as_str()),
                Segment::Text { .. } => None,
            })
            .collect()
    }
}

/// Strip control characters and collapse whitespace runs.
pub fn clean_text(raw: &str) -> String {
    let mapped: String = raw.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Who spoke a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    User,
    Assistant,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message as persisted in a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: SpeakerRole,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
}

/// A message held in the short-term cache, awaiting promotion into the
/// conversation log.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: Uuid,
    pub role: SpeakerRole,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sent_at: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    /// Set once the entry has been written to the fallback log, so an
    /// eviction cannot lose it.
    pub fallback_persisted: bool,
}

impl PendingMessage {
    pub fn from_user(msg: &InboundMessage, content: String) -> Self {
        Self {
            id: msg.id,
            role: SpeakerRole::User,
            content,
            sender_id: msg.sender_id.clone(),
            sender_name: msg.sender_name.clone(),
            sent_at: msg.timestamp,
            cached_at: Utc::now(),
            fallback_persisted: false,
        }
    }

    pub fn from_assistant(self_id: &str, self_name: &str, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            role: SpeakerRole::Assistant,
            content,
            sender_id: self_id.to_owned(),
            sender_name: self_name.to_owned(),
            sent_at: now,
            cached_at: now,
            fallback_persisted: false,
        }
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            role: self.role,
            content: self.content.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            timestamp: self.sent_at,
        }
    }
}

// ── Turn outcomes ──────────────────────────────────────────────

/// Why a message was discarded before any model involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ChannelNotEnabled,
    BlacklistedKeyword,
    OwnMessage,
    EmptyContent,
}

/// Why a turn ended without a reply even though the message was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilentReason {
    FailedDraw,
    DeclinedByModel,
    DecisionTimeout,
    DecisionFailed,
    GenerationTimeout,
    GenerationFailed,
    /// Another turn in this channel already has a model call in flight.
    InFlight,
}

/// Final disposition of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Discarded outright; nothing stored.
    Dropped(DropReason),
    /// Kept in the short-term cache without replying.
    Silent(SilentReason),
    /// A reply was produced and the conversation log updated.
    Replied { content: String },
}
