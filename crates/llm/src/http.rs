//! HTTP-based LLM providers.
//!
//! Supports OpenAI-compatible APIs (OpenAI, Google Gemini, DeepSeek, etc.)
//! and Anthropic's native Messages API.

use crate::provider::{CompletionRequest, CompletionResponse, LlmError, LlmProvider, Role};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Token cap for image description calls.
const VISION_MAX_TOKENS: u32 = 300;

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    /// Falls back to OpenAI-compatible format.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
        {
            Self::OpenAi
        } else if m.starts_with("claude-") {
            Self::Anthropic
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    fn is_anthropic(self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

// ── OpenAI-compatible request/response types ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

/// Vision request: the user message carries text + image parts.
#[derive(Serialize)]
struct OaiVisionRequest {
    model: String,
    messages: Vec<OaiVisionMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OaiVisionMessage {
    role: &'static str,
    content: Vec<OaiContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OaiContentPart {
    Text { text: String },
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Serialize)]
struct OaiImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ── Anthropic Messages API types ──

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicMessageContent,
}

/// Message content: either a plain string or an array of content blocks.
#[derive(Serialize)]
#[serde(untagged)]
enum AnthropicMessageContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

/// A content block in an Anthropic message (request side).
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    usage: Option<AnthropicUsage>,
}

/// A content block in an Anthropic response. Only text comes back since
/// requests never offer tools.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ── Provider ──

/// HTTP-based LLM provider. Handles both OpenAI-compatible and Anthropic APIs.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from model name + API key + optional base URL override.
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::from_model(&model);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        if self.kind.is_anthropic() {
            format!("{}/v1/messages", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Unknown => "unknown",
        }
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        if self.kind.is_anthropic() {
            Box::pin(self.complete_anthropic(request))
        } else {
            Box::pin(self.complete_openai(request))
        }
    }

    fn describe_image(
        &self,
        image_url: String,
        prompt: String,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        if self.kind.is_anthropic() {
            Box::pin(self.describe_anthropic(image_url, prompt))
        } else {
            Box::pin(self.describe_openai(image_url, prompt))
        }
    }
}

impl HttpProvider {
    /// OpenAI-compatible completion (OpenAI, Gemini, DeepSeek, Unknown).
    async fn complete_openai(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = OaiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(|m| OaiMessage {
                role: role_str(&m.role),
                content: m.content.clone(),
            }).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp.json().await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let content = api.choices.into_iter().next()
            .map(|c| c.message.content).unwrap_or_default();
        let (input_tokens, output_tokens) = api.usage
            .map(|u| (u.prompt_tokens, u.completion_tokens)).unwrap_or((0, 0));

        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    /// Anthropic Messages API completion.
    async fn complete_anthropic(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // Extract system message separately (Anthropic puts it at top level).
        let mut system = None;
        let messages: Vec<AnthropicMessage> = request.messages.iter().filter_map(|m| {
            if m.role == Role::System {
                system = Some(m.content.clone());
                None
            } else {
                Some(AnthropicMessage {
                    role: role_str(&m.role),
                    content: AnthropicMessageContent::Text(m.content.clone()),
                })
            }
        }).collect();

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
        };

        let resp = self.client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: AnthropicResponse = resp.json().await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let content: String = api.content.iter().map(|b| match b {
            AnthropicResponseBlock::Text { text } => text.as_str(),
        }).collect::<Vec<_>>().join("");

        let (input_tokens, output_tokens) = api.usage
            .map(|u| (u.input_tokens, u.output_tokens)).unwrap_or((0, 0));

        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    /// Image description via OpenAI-style image_url content parts.
    async fn describe_openai(&self, image_url: String, prompt: String) -> Result<String, LlmError> {
        let body = OaiVisionRequest {
            model: self.model.clone(),
            messages: vec![OaiVisionMessage {
                role: "user",
                content: vec![
                    OaiContentPart::Text { text: prompt },
                    OaiContentPart::ImageUrl { image_url: OaiImageUrl { url: image_url } },
                ],
            }],
            max_tokens: VISION_MAX_TOKENS,
        };

        let resp = self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp.json().await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        Ok(api.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default())
    }

    /// Image description via Anthropic URL-source image blocks.
    async fn describe_anthropic(&self, image_url: String, prompt: String) -> Result<String, LlmError> {
        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: VISION_MAX_TOKENS,
            system: None,
            messages: vec![AnthropicMessage {
                role: "user",
                content: AnthropicMessageContent::Blocks(vec![
                    AnthropicBlock::Image {
                        source: AnthropicImageSource { kind: "url", url: image_url },
                    },
                    AnthropicBlock::Text { text: prompt },
                ]),
            }],
            temperature: 0.2,
        };

        let resp = self.client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: AnthropicResponse = resp.json().await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let content: String = api.content.iter().map(|b| match b {
            AnthropicResponseBlock::Text { text } => text.as_str(),
        }).collect::<Vec<_>>().join("");

        Ok(content)
    }
}

/// Build an LlmProvider from environment variables.
/// Reads `ATTUNE_LLM_MODEL`, `ATTUNE_LLM_API_KEY`, optionally `ATTUNE_LLM_BASE_URL`.
/// Returns `None` if model or key is not set.
pub fn from_env() -> Option<HttpProvider> {
    let model = std::env::var("ATTUNE_LLM_MODEL").ok()?;
    let api_key = std::env::var("ATTUNE_LLM_API_KEY").ok()?;
    let base_url = std::env::var("ATTUNE_LLM_BASE_URL").ok();
    Some(HttpProvider::new(model, api_key, base_url))
}
