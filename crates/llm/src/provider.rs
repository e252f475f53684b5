use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// LLM completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error type for LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("provider does not support image description")]
    VisionUnsupported,
}

/// Trait for LLM providers (OpenAI, Claude, Gemini, etc.)
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>>;

    /// Describe an image for linearization into text context.
    /// Providers without multimodal support return `VisionUnsupported`.
    fn describe_image(
        &self,
        _image_url: String,
        _prompt: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        Box::pin(async { Err(LlmError::VisionUnsupported) })
    }
}

/// Mock provider for testing.
///
/// `new` returns the same response forever; `scripted` pops responses in
/// order and fails once exhausted (so tests notice miscounted calls);
/// `failing` errors every call; `delayed` sleeps before answering, which
/// lets timeout paths be exercised.
pub struct MockProvider {
    script: Mutex<VecDeque<String>>,
    fixed: Option<String>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fixed: Some(response.into()),
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Respond with each entry once, in order; further calls fail.
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fixed: None,
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call with a request error.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fixed: None,
            fail: true,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering with `response`.
    pub fn delayed(response: impl Into<String>, delay: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fixed: Some(response.into()),
            fail: false,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_response(&self) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::RequestFailed("mock failure".into()));
        }
        if let Some(text) = self.script.lock().expect("mock script lock").pop_front() {
            return Ok(text);
        }
        match &self.fixed {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::RequestFailed("mock script exhausted".into())),
        }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let next = self.next_response();
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let content = next?;
            Ok(CompletionResponse { content, input_tokens: 10, output_tokens: 20 })
        })
    }

    fn describe_image(
        &self,
        _image_url: String,
        _prompt: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let next = self.next_response();
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            next
        })
    }
}
