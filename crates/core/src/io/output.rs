use tokio::sync::mpsc;

use crate::types::InboundMessage;

/// An outbound reply to deliver back to a group channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub platform: String,
    pub channel: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(
        platform: impl Into<String>,
        channel: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            channel: channel.into(),
            content: content.into(),
        }
    }

    /// Build a reply addressed to the channel a message arrived on.
    pub fn replying_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self::new(msg.platform.clone(), msg.channel.clone(), content)
    }

    pub fn channel_key(&self) -> String {
        format!("{}:{}", self.platform, self.channel)
    }
}

/// Output channel sender; the engine pushes replies here.
pub type OutputSender = mpsc::Sender<OutboundMessage>;
/// Output channel receiver; platform adapters consume from here.
pub type OutputReceiver = mpsc::Receiver<OutboundMessage>;

/// Create an output channel with the given buffer size.
pub fn channel(buffer: usize) -> (OutputSender, OutputReceiver) {
    mpsc::channel(buffer)
}
