//! LLM client: one request/response call per conversational turn.
//!
//! The provider takes the conversation history plus an optional board image
//! and returns a single structured document (speech, board actions, mode).
//! The call is cancellable and capped by a hard timeout; every failure mode
//! degrades to an empty turn upstream.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::board::BoardAction;
use crate::session::{BoardSnapshot, Role, TutorMode, Turn};

use prompt::SYSTEM_PROMPT;

/// Hard cap on one LLM call; expiry is treated as an empty response.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(30);

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Errors from one model call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("response is not a valid tutor reply: {0}")]
    InvalidResponse(String),

    #[error("call timed out")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,
}

/// Inputs for one turn's model call.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation history, oldest first
    pub turns: Vec<Turn>,
    /// Whiteboard status note appended to the last user message
    pub board_note: Option<String>,
    /// Board image attached to the last user message
    pub snapshot: Option<Arc<BoardSnapshot>>,
}

/// The model's structured reply, parsed strictly.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmReply {
    #[serde(default)]
    pub speech: String,
    #[serde(default)]
    pub board_actions: Vec<BoardAction>,
    #[serde(default)]
    pub tutor_state: TutorMode,
    #[serde(default)]
    pub wait_for_student: bool,
}

/// Seam between the orchestrator and the model provider.
#[async_trait]
pub trait TutorModel: Send + Sync {
    async fn respond(
        &self,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmReply, LlmError>;
}

/// Anthropic Messages API client.
pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    async fn call(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": build_messages(request),
        });

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let value: Value = response.json().await?;
        let raw = value
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| LlmError::InvalidResponse("no text content block".to_string()))?;

        debug!(chars = raw.len(), "received model reply");
        parse_reply(raw)
    }
}

#[async_trait]
impl TutorModel for AnthropicModel {
    async fn respond(
        &self,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmReply, LlmError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = tokio::time::timeout(LLM_TIMEOUT, self.call(&request)) => {
                match result {
                    Ok(reply) => reply,
                    Err(_) => {
                        warn!("model call exceeded {LLM_TIMEOUT:?}");
                        Err(LlmError::Timeout)
                    }
                }
            }
        }
    }
}

/// Build the provider message array: history as alternating roles, the board
/// note appended to the last user message, and the snapshot attached as an
/// image block on that same message.
fn build_messages(request: &LlmRequest) -> Vec<Value> {
    let mut messages: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| {
            json!({
                "role": match turn.role {
                    Role::Student => "user",
                    Role::Tutor => "assistant",
                },
                "content": turn.content,
            })
        })
        .collect();

    let last_user = messages
        .iter()
        .rposition(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"));
    let Some(idx) = last_user else {
        return messages;
    };

    let mut text = messages[idx]
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    if let Some(note) = &request.board_note {
        text.push('\n');
        text.push_str(note);
    }

    messages[idx] = match &request.snapshot {
        Some(snapshot) => json!({
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": "image/png",
                        "data": snapshot.image_base64,
                    },
                },
                { "type": "text", "text": text },
            ],
        }),
        None => json!({ "role": "user", "content": text }),
    };

    messages
}

/// Parse the raw model output into a reply, strictly.
///
/// Tolerates a markdown code fence around the JSON (models add them despite
/// instructions) but nothing else: unparseable output is an error, which the
/// orchestrator treats as an empty turn.
pub fn parse_reply(raw: &str) -> Result<LlmReply, LlmError> {
    let candidate = strip_fences(raw);
    serde_json::from_str(candidate)
        .map_err(|e| LlmError::InvalidResponse(format!("{e} in {:.120}", candidate)))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    match body.rfind("```") {
        Some(idx) => body[..idx].trim(),
        None => body.trim(),
    }
}
