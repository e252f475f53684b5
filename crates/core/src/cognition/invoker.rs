//! Model call wrappers with uniform timeout semantics.
//!
//! Every external call resolves to a `CallOutcome` so the pipeline can
//! fail closed without unwinding: a timeout or error at the decision
//! stage means no reply, never a crash.

use crate::gate::FrequencyVerdict;
use attune_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use std::time::Duration;

/// Token and temperature settings per call kind. The decision and review
/// calls want one-word answers; generation gets room to talk.
const DECISION_MAX_TOKENS: u32 = 8;
const DECISION_TEMPERATURE: f32 = 0.1;
const REPLY_MAX_TOKENS: u32 = 512;
const REPLY_TEMPERATURE: f32 = 0.8;
const REVIEW_MAX_TOKENS: u32 = 16;
const REVIEW_TEMPERATURE: f32 = 0.1;

/// Result of a model call as the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Ok(T),
    Timeout,
    Failed(String),
}

async fn call<P: LlmProvider + ?Sized>(
    provider: &P,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> CallOutcome<String> {
    let request = CompletionRequest { messages, max_tokens, temperature };
    match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(Ok(resp)) => CallOutcome::Ok(resp.content),
        Ok(Err(e)) => CallOutcome::Failed(e.to_string()),
        Err(_) => CallOutcome::Timeout,
    }
}

/// Parse the decision verdict. Anything that does not clearly open with
/// an affirmative counts as a no.
pub fn parse_decision(reply: &str) -> bool {
    let lower = reply.trim().to_lowercase();
    let token = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|t| !t.is_empty())
        .unwrap_or("");
    matches!(token, "yes" | "y" | "reply" | "respond")
}

/// Ask whether to reply. `Ok(true)` means speak.
pub async fn decide<P: LlmProvider + ?Sized>(
    provider: &P,
    messages: Vec<ChatMessage>,
    timeout: Duration,
) -> CallOutcome<bool> {
    match call(provider, messages, DECISION_MAX_TOKENS, DECISION_TEMPERATURE, timeout).await {
        CallOutcome::Ok(reply) => CallOutcome::Ok(parse_decision(&reply)),
        CallOutcome::Timeout => CallOutcome::Timeout,
        CallOutcome::Failed(e) => CallOutcome::Failed(e),
    }
}

/// Generate the reply text. An empty completion counts as a failure.
pub async fn generate<P: LlmProvider + ?Sized>(
    provider: &P,
    messages: Vec<ChatMessage>,
    timeout: Duration,
) -> CallOutcome<String> {
    match call(provider, messages, REPLY_MAX_TOKENS, REPLY_TEMPERATURE, timeout).await {
        CallOutcome::Ok(reply) => {
            let trimmed = reply.trim().to_owned();
            if trimmed.is_empty() {
                CallOutcome::Failed("empty completion".into())
            } else {
                CallOutcome::Ok(trimmed)
            }
        }
        CallOutcome::Timeout => CallOutcome::Timeout,
        CallOutcome::Failed(e) => CallOutcome::Failed(e),
    }
}

/// Run a frequency review. `Ok(None)` means the model's answer was not
/// usable; the caller resets its window either way.
pub async fn review<P: LlmProvider + ?Sized>(
    provider: &P,
    messages: Vec<ChatMessage>,
    timeout: Duration,
) -> CallOutcome<Option<FrequencyVerdict>> {
    match call(provider, messages, REVIEW_MAX_TOKENS, REVIEW_TEMPERATURE, timeout).await {
        CallOutcome::Ok(reply) => CallOutcome::Ok(FrequencyVerdict::parse(&reply)),
        CallOutcome::Timeout => CallOutcome::Timeout,
        CallOutcome::Failed(e) => CallOutcome::Failed(e),
    }
}
