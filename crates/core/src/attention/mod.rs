mod model;
pub mod snapshot;

pub use model::{ATTENTION_FLOOR, EMOTION_GAIN, ChannelAttention, UserProfile};
