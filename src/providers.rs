//! Chat-stream collaborators.
//!
//! The conversation controller only needs a [`ChatProvider`]: a function from
//! an ancestor chain of messages to a stream of text deltas that stops when
//! its [`CancelSignal`] fires. This module defines that seam and ships the
//! OpenAI and Anthropic server-sent-event adapters.

use std::collections::VecDeque;
use std::env;
use std::pin::Pin;
use std::sync::Arc;

use clap::ValueEnum;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abort::CancelSignal;
use crate::attachment::Attachment;
use crate::error::ProviderError;
use crate::node::Role;

/// Boxed stream of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Produces a stream of text deltas for a message history.
///
/// Implementations must stop yielding promptly once `cancel` fires. An error
/// item ends the generation; deltas yielded before it stay valid.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
        cancel: CancelSignal,
    ) -> TextStream;
}

// ---------------------------------------------------------------------------
// Provider-neutral request types
// ---------------------------------------------------------------------------

/// One message of the ancestor chain sent as the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage { role, content: content.into(), attachments: Vec::new() }
    }

    /// Message text with inline text attachments appended as fenced blocks.
    /// Binary and external attachments are referenced by name only.
    pub fn text_with_attachments(&self) -> String {
        let mut out = self.content.clone();
        for att in &self.attachments {
            let body = if att.mime_type().starts_with("text/") || att.mime_type() == "application/json" {
                att.inline_bytes()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            } else {
                None
            };
            match body {
                Some(text) => {
                    out.push_str(&format!("\n\n[file: {}]\n```\n{}\n```", att.file_name(), text));
                }
                None => out.push_str(&format!("\n\n[file: {} ({})]", att.file_name(), att.mime_type())),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        ChatOptions {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Openai => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai => "gpt-3.5-turbo",
            Provider::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Build a client, reading the API key from the provider's env var.
    pub fn connect(&self) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        match self {
            Provider::Openai => Ok(Arc::new(OpenAiProvider::from_env()?)),
            Provider::Anthropic => Ok(Arc::new(AnthropicProvider::from_env()?)),
        }
    }
}

// -- OpenAI SSE types -------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenAIChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<OpenAIChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIDelta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub delta: OpenAIDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChunk {
    pub choices: Vec<OpenAIChoice>,
}

// -- Anthropic SSE types ----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentDelta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub delta: Option<AnthropicContentDelta>,
    #[serde(default)]
    pub error: Option<AnthropicErrorBody>,
}

// ---------------------------------------------------------------------------
// SSE plumbing shared by both adapters
// ---------------------------------------------------------------------------

/// What one `data:` line contributes to the text stream.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Text(String),
    Skip,
    Done,
    Error(String),
}

pub fn parse_openai_data(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<OpenAIChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|t| !t.is_empty())
            .map_or(SseEvent::Skip, SseEvent::Text),
        Err(_) => SseEvent::Skip,
    }
}

pub fn parse_anthropic_data(data: &str) -> SseEvent {
    match serde_json::from_str::<AnthropicStreamEvent>(data) {
        Ok(event) => match event.event_type.as_str() {
            "content_block_delta" => event
                .delta
                .and_then(|d| d.text)
                .filter(|t| !t.is_empty())
                .map_or(SseEvent::Skip, SseEvent::Text),
            "message_stop" => SseEvent::Done,
            "error" => SseEvent::Error(
                event.error.map(|e| e.message).unwrap_or_else(|| "unknown error".to_string()),
            ),
            _ => SseEvent::Skip,
        },
        Err(_) => SseEvent::Skip,
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct SseState {
    request: Option<reqwest::RequestBuilder>,
    body: Option<ByteStream>,
    /// Raw bytes not yet terminated by a newline. Decoding waits for a full
    /// line so a multi-byte character split across chunks stays intact.
    buffer: Vec<u8>,
    queue: VecDeque<Result<String, ProviderError>>,
    done: bool,
    cancel: CancelSignal,
}

impl SseState {
    /// Move complete `data:` lines from the buffer into the queue.
    fn drain_lines(&mut self, parse: fn(&str) -> SseEvent) {
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            self.push_line(line.trim(), parse);
        }
    }

    fn push_line(&mut self, line: &str, parse: fn(&str) -> SseEvent) {
        if self.done {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        match parse(data.trim_start()) {
            SseEvent::Text(text) => self.queue.push_back(Ok(text)),
            SseEvent::Skip => {}
            SseEvent::Done => self.done = true,
            SseEvent::Error(msg) => {
                self.queue.push_back(Err(ProviderError::Stream(msg)));
                self.done = true;
            }
        }
    }
}

fn sse_text_stream(
    request: reqwest::RequestBuilder,
    provider: &'static str,
    parse: fn(&str) -> SseEvent,
    cancel: CancelSignal,
) -> TextStream {
    let state = SseState {
        request: Some(request),
        body: None,
        buffer: Vec::new(),
        queue: VecDeque::new(),
        done: false,
        cancel,
    };

    Box::pin(stream::unfold(state, move |mut st| async move {
        loop {
            if st.cancel.is_cancelled() {
                debug!(provider, "stream cancelled");
                return None;
            }
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            if let Some(request) = st.request.take() {
                let sent = tokio::select! {
                    r = request.send() => r,
                    _ = st.cancel.cancelled() => return None,
                };
                let response = match sent {
                    Ok(r) => r,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(ProviderError::Http(e)), st));
                    }
                };
                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    st.done = true;
                    return Some((Err(ProviderError::Status { provider, status, body }), st));
                }
                st.body = Some(Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))));
                continue;
            }

            let Some(body) = st.body.as_mut() else {
                return None;
            };
            let chunk = tokio::select! {
                c = body.next() => c,
                _ = st.cancel.cancelled() => return None,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    st.drain_lines(parse);
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.queue.push_back(Err(ProviderError::Http(e)));
                }
                None => {
                    let rest = std::mem::take(&mut st.buffer);
                    st.push_line(String::from_utf8_lossy(&rest).trim(), parse);
                    st.done = true;
                }
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    pub base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        OpenAiProvider {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let key = env::var("OPENAI_API_KEY").map_err(|_| ProviderError::MissingApiKey("OPENAI_API_KEY"))?;
        Ok(Self::new(key))
    }

    pub fn build_request(messages: &[ChatMessage], options: &ChatOptions) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: options.model.clone(),
            messages: messages
                .iter()
                .filter(|m| !(m.role == Role::System && m.content.trim().is_empty()))
                .map(|m| OpenAIChatMessage {
                    role: m.role.to_string(),
                    content: m.text_with_attachments(),
                })
                .collect(),
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>, options: &ChatOptions, cancel: CancelSignal) -> TextStream {
        let request = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&Self::build_request(&messages, options));
        sse_text_stream(request, "openai", parse_openai_data, cancel)
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    pub base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        AnthropicProvider {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let key =
            env::var("ANTHROPIC_API_KEY").map_err(|_| ProviderError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        Ok(Self::new(key))
    }

    /// System messages are joined into the top-level `system` field; empty
    /// turns are dropped since the API rejects them.
    pub fn build_request(messages: &[ChatMessage], options: &ChatOptions) -> AnthropicRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
            .collect();
        AnthropicRequest {
            model: options.model.clone(),
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| AnthropicMessage {
                    role: m.role.to_string(),
                    content: m.text_with_attachments(),
                })
                .filter(|m| !m.content.trim().is_empty())
                .collect(),
            max_tokens: options.max_tokens,
            stream: true,
            temperature: options.temperature,
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
        }
    }
}

impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>, options: &ChatOptions, cancel: CancelSignal) -> TextStream {
        let request = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&Self::build_request(&messages, options));
        sse_text_stream(request, "anthropic", parse_anthropic_data, cancel)
    }
}
