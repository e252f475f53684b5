use tokio::sync::mpsc;

use crate::types::InboundMessage;

/// Input channel sender; platform adapters push group messages here.
pub type InputSender = mpsc::Sender<InboundMessage>;
/// Input channel receiver; the engine consumes from here.
pub type InputReceiver = mpsc::Receiver<InboundMessage>;

/// Create an input channel with the given buffer size.
pub fn channel(buffer: usize) -> (InputSender, InputReceiver) {
    mpsc::channel(buffer)
}

/// Submit a plain text message from a group member.
pub async fn submit_text(
    tx: &InputSender,
    platform: impl Into<String>,
    channel: impl Into<String>,
    sender_id: impl Into<String>,
    sender_name: impl Into<String>,
    content: impl Into<String>,
) -> Result<(), mpsc::error::SendError<InboundMessage>> {
    tx.send(InboundMessage::text(platform, channel, sender_id, sender_name, content))
        .await
}

/// Submit a text message that mentions the engine directly.
pub async fn submit_mention(
    tx: &InputSender,
    platform: impl Into<String>,
    channel: impl Into<String>,
    sender_id: impl Into<String>,
    sender_name: impl Into<String>,
    content: impl Into<String>,
) -> Result<(), mpsc::error::SendError<InboundMessage>> {
    let mut msg = InboundMessage::text(platform, channel, sender_id, sender_name, content);
    msg.mentions_self = true;
    tx.send(msg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_text_builds_a_plain_message() {
        let (tx, mut rx) = channel(4);
        submit_text(&tx, "repl", "local", "u1", "ana", "hello").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.plain_text(), "hello");
        assert_eq!(msg.channel_key(), "repl:local");
        assert!(!msg.mentions_self);
    }

    #[tokio::test]
    async fn submit_mention_sets_the_flag() {
        let (tx, mut rx) = channel(4);
        submit_mention(&tx, "repl", "local", "u1", "ana", "hey you").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert!(msg.mentions_self);
    }

    #[tokio::test]
    async fn channel_respects_buffer() {
        let (tx, _rx) = channel(2);
        submit_text(&tx, "repl", "local", "u1", "ana", "a").await.unwrap();
        submit_text(&tx, "repl", "local", "u1", "ana", "b").await.unwrap();
        let third = InboundMessage::text("repl", "local", "u1", "ana", "c");
        assert!(tx.try_send(third).is_err());
    }
}
