//! Shared types for LLM client implementations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SourceErrorKind;

/// Errors that can occur during LLM operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
    #[error("missing API key")]
    MissingApiKey,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("output failed schema validation at {call_site}: {errors}")]
    InvalidOutput { call_site: String, errors: String },
    #[error("model declined to answer: {0}")]
    Refusal(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Map into the engine-wide error taxonomy
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            LlmError::RateLimited(_) => SourceErrorKind::RateLimited,
            LlmError::Timeout(_) => SourceErrorKind::Timeout,
            LlmError::InvalidOutput { .. } => SourceErrorKind::LlmInvalidOutput,
            LlmError::Refusal(_) => SourceErrorKind::LlmRefusal,
            LlmError::ApiError { status, .. } if *status >= 500 => SourceErrorKind::Upstream5xx,
            LlmError::ApiError { status, .. } if *status == 401 || *status == 403 => {
                SourceErrorKind::AuthFailed
            }
            LlmError::MissingApiKey | LlmError::NotConfigured(_) => SourceErrorKind::ConfigMissing,
            LlmError::InvalidResponse(_) => SourceErrorKind::ParseError,
            _ => SourceErrorKind::Upstream5xx,
        }
    }
}

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: MessageRole::System,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: MessageRole::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.to_string(),
        }
    }
}

/// Request for a chat completion
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// None for reasoning-family models, which reject output-token limits
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token usage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            LlmError::RateLimited("quota".to_string()).kind(),
            SourceErrorKind::RateLimited
        );
        assert_eq!(
            LlmError::InvalidOutput {
                call_site: "decomposition".to_string(),
                errors: "missing field".to_string(),
            }
            .kind(),
            SourceErrorKind::LlmInvalidOutput
        );
        assert_eq!(
            LlmError::ApiError {
                status: 503,
                message: String::new()
            }
            .kind(),
            SourceErrorKind::Upstream5xx
        );
        assert_eq!(
            LlmError::ApiError {
                status: 401,
                message: String::new()
            }
            .kind(),
            SourceErrorKind::AuthFailed
        );
    }
}
