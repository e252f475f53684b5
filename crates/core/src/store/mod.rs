mod conversation;
mod fallback;

pub use conversation::{ConversationStore, JsonlConversationStore, MemoryConversationStore};
pub use fallback::{
    FALLBACK_CAP, FallbackReason, FallbackRecord, FallbackStore, JsonlFallbackStore,
    MemoryFallbackStore,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Turn a channel key into a safe file stem.
pub(crate) fn sanitize_key(channel_key: &str) -> String {
    channel_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
