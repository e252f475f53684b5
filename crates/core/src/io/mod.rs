//! Message channels between platform adapters and the engine.

pub mod input;
pub mod output;
