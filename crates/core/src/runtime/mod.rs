mod channel;
mod engine;
mod pipeline;

pub use channel::{ChannelHandle, ChannelMap, ChannelState};
pub use engine::Engine;
pub use pipeline::{EngineCtx, process};
