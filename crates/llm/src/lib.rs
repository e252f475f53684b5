//! LLM provider abstraction: a small trait over chat completion plus an
//! optional image description call, with HTTP implementations for
//! OpenAI-compatible APIs and Anthropic, and a mock for tests.

pub mod http;
pub mod provider;

pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmError, LlmProvider, MockProvider, Role,
};
