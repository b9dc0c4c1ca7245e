//! LLM request/response types for Colloquy.
//!
//! These types model the data shapes for chat-completion provider
//! interactions: requests, responses, usage, capabilities, and the
//! configuration entries the failover router is built from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request to an LLM provider for a completion.
///
/// `model` may be left empty; each provider then substitutes its own
/// configured model, which is how one request fans out across a failover
/// chain of differently-modeled backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Response from an LLM provider for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Token usage for a completion request/response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Errors from LLM provider operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("context length exceeded: max {max}, requested {requested}")]
    ContextLengthExceeded { max: u32, requested: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Capabilities of an LLM provider, checked before an attempt is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Supports plain chat completion (everything here does, unless disabled).
    #[serde(default = "default_true")]
    pub chat: bool,
    /// Suitable for history summarization.
    #[serde(default = "default_true")]
    pub summarization: bool,
    /// Emits `<think>` reasoning segments that must be stripped from replies.
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_context_tokens() -> u32 {
    128_000
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            chat: true,
            summarization: true,
            reasoning: false,
            max_context_tokens: default_max_context_tokens(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Configuration for a single provider in the failover order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Canonical name users switch to (must be unique).
    pub name: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Model identifier to request from this provider.
    pub model: String,
    /// Priority for failover ordering; lower = tried first.
    pub priority: u32,
    /// Whether this provider is attempted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// What this provider supports.
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

/// One provider's failure within an exhausted failover pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_role_serde() {
        let role = MessageRole::Assistant;
        let json = serde_json::to_string(&role).unwrap();
        assert_eq!(json, "\"assistant\"");
        let parsed: MessageRole = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, MessageRole::Assistant);
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total_tokens(), 150);
        assert_eq!(Usage::default().total_tokens(), 0);
    }

    #[test]
    fn test_capabilities_defaults() {
        let caps: ProviderCapabilities = serde_json::from_str("{}").unwrap();
        assert!(caps.chat);
        assert!(caps.summarization);
        assert!(!caps.reasoning);
        assert_eq!(caps.max_context_tokens, 128_000);
        assert_eq!(caps.max_output_tokens, 4096);
    }

    #[test]
    fn test_provider_config_toml() {
        let toml_str = r#"
name = "grok"
base_url = "https://api.example.com/v1"
api_key_env = "GROK_API_KEY"
model = "grok-4.1"
priority = 0

[capabilities]
reasoning = true
max_context_tokens = 200000
"#;
        let config: ProviderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "grok");
        assert!(config.enabled);
        assert!(config.capabilities.reasoning);
        assert_eq!(config.capabilities.max_context_tokens, 200_000);
        // Unspecified capability fields keep their defaults.
        assert!(config.capabilities.chat);
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::ContextLengthExceeded {
            max: 100_000,
            requested: 120_000,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains("120000"));
    }

    #[test]
    fn test_provider_failure_display() {
        let failure = ProviderFailure {
            provider: "deepseek".to_string(),
            reason: "timed out after 60s".to_string(),
        };
        assert_eq!(failure.to_string(), "deepseek: timed out after 60s");
    }
}
