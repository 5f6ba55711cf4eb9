//! Query engine abstraction layer.
//!
//! Defines the [`QueryEngine`] trait, the engine's wire format, and the
//! shared error type. The engine is an opaque black box: it answers a
//! question and reports, on its own word, which views it consulted.
//!
//! One implementation is provided:
//! - [`http::HttpEngine`]: `GET /answerQuestion` over HTTP(S) with Basic auth

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;

// ---------------------------------------------------------------------------
// Conversation types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Human caller message.
    User,
    /// Earlier gateway answer.
    Assistant,
}

/// A single message in the caller's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The author of the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

/// One question for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineRequest {
    /// The caller's latest question.
    pub question: String,
    /// Earlier messages, oldest first, already trimmed to the history window.
    pub history: Vec<ChatMessage>,
    /// Views the caller's role may use. Advisory only; the engine may ignore it.
    pub resource_hint: Vec<String>,
}

impl EngineRequest {
    /// Question text sent on the wire, with prior turns folded in as a transcript.
    pub fn wire_question(&self) -> String {
        if self.history.is_empty() {
            return self.question.clone();
        }
        let transcript = self
            .history
            .iter()
            .map(|msg| {
                let speaker = match msg.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                format!("{speaker}: {}", msg.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Conversation so far:\n{transcript}\n\nQuestion: {}",
            self.question
        )
    }
}

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// `tables_used` as reported by the engine.
///
/// Arrives either as a native array or as a string holding an encoded list.
#[doc(hidden)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TablesUsed {
    /// Field absent or `null`.
    #[default]
    Missing,
    /// Native JSON array.
    List(Vec<String>),
    /// String-encoded list (JSON, Python repr, or comma-separated).
    Encoded(String),
}

impl TablesUsed {
    /// Decode into raw identifiers, in reported order.
    pub fn into_identifiers(self) -> Vec<String> {
        match self {
            Self::Missing => Vec::new(),
            Self::List(items) => items,
            Self::Encoded(text) => decode_table_list(&text),
        }
    }
}

fn decode_table_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
        return items;
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Engine `/answerQuestion` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    /// Natural-language answer.
    pub answer: String,
    /// Views the engine says it consulted.
    #[serde(default)]
    pub tables_used: TablesUsed,
    /// Generated structured query.
    #[serde(default)]
    pub sql_query: Option<String>,
    /// Engine-side wall time in seconds.
    #[serde(default)]
    pub total_execution_time: Option<f64>,
    /// Token accounting, shape varies by engine version.
    #[serde(default)]
    pub tokens: Option<Value>,
    /// Optional answer confidence.
    #[serde(default)]
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A parsed engine answer. Produced once per call and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    /// Natural-language answer text.
    pub answer_text: String,
    /// Identifiers from `tables_used`, as reported (prefixes intact).
    pub resources_used: Vec<String>,
    /// Generated structured query, opaque to the gateway.
    pub structured_query: Option<String>,
    /// Engine-side execution time in seconds.
    pub execution_time: Option<f64>,
    /// Total tokens spent, when reported.
    pub total_tokens: Option<u64>,
    /// Answer confidence, when reported.
    pub confidence: Option<f64>,
}

/// Parse an engine response body.
///
/// # Errors
///
/// Returns `EngineError::Parse` if the body is not the expected JSON shape.
pub fn parse_response(body: &str) -> Result<EngineResponse, EngineError> {
    let payload: AnswerPayload =
        serde_json::from_str(body).map_err(|e| EngineError::Parse(e.to_string()))?;

    let total_tokens = payload.tokens.as_ref().and_then(|tokens| match tokens {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.get("total_tokens").and_then(Value::as_u64),
        _ => None,
    });

    Ok(EngineResponse {
        answer_text: payload.answer,
        resources_used: payload.tables_used.into_identifiers(),
        structured_query: payload.sql_query.filter(|q| !q.trim().is_empty()),
        execution_time: payload.total_execution_time,
        total_tokens,
        confidence: payload.confidence,
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by a query engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Connection or protocol failure.
    #[error("engine request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The call did not finish within the configured timeout.
    #[error("engine request timed out")]
    Timeout,
    /// The engine responded with a non-success status.
    #[error("engine returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The response body did not match the expected schema.
    #[error("engine response parse error: {0}")]
    Parse(String),
}

impl EngineError {
    /// Whether this is a transport failure rather than a malformed body.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `EngineError::Request` on transport failure, `EngineError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, EngineError> {
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest_error)?;
    if !status.is_success() {
        return Err(EngineError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Classify a reqwest failure, separating timeouts.
pub fn map_reqwest_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::Request(err)
    }
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"(?i)basic\s+[A-Za-z0-9+/=]{8,}",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{8,}",
        r#"(?i)"?password"?\s*[:=]\s*"?[^\s",}]+"?"#,
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Request dispatcher interface.
///
/// Implementations carry no access-control logic: they forward the question
/// and the advisory hint, and return what the engine said.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Ask the engine one question.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on network, status, timeout, or parse failure.
    async fn answer_question(&self, request: &EngineRequest)
        -> Result<EngineResponse, EngineError>;

    /// Human-readable engine location for logs.
    fn endpoint(&self) -> &str;
}
