//! Conversation, turn, and identity types for Colloquy.
//!
//! These types model one independently-sequenced chat context: its key,
//! its ordered turn history, and the per-conversation overrides that shape
//! prompt assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

// Re-export MessageRole from llm module (turns and prompt messages share it).
pub use crate::llm::MessageRole;

/// Scope of a conversation: one-on-one or a shared group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Private,
    Group,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeType::Private => write!(f, "private"),
            ScopeType::Group => write!(f, "group"),
        }
    }
}

impl FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(ScopeType::Private),
            "group" => Ok(ScopeType::Group),
            other => Err(format!("invalid scope type: '{other}'")),
        }
    }
}

/// Identity of a chat user, stable across conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permission tier of an identity, as reported by access control.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('user', 'admin', 'super_admin'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    User,
    Admin,
    SuperAdmin,
}

impl PermissionTier {
    /// Admin and super-admin tiers bypass quota checks.
    pub fn is_privileged(&self) -> bool {
        matches!(self, PermissionTier::Admin | PermissionTier::SuperAdmin)
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionTier::User => write!(f, "user"),
            PermissionTier::Admin => write!(f, "admin"),
            PermissionTier::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

impl FromStr for PermissionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(PermissionTier::User),
            "admin" => Ok(PermissionTier::Admin),
            "super_admin" => Ok(PermissionTier::SuperAdmin),
            other => Err(format!("invalid permission tier: '{other}'")),
        }
    }
}

/// Key of one independently-sequenced conversation.
///
/// Combines the scope with the scope-local chat id; private conversations
/// use the user id as the chat id. Rendered as `scope:chat_id` (e.g.
/// `private:42`, `group:-1001234`), which is also the storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationKey {
    pub scope: ScopeType,
    pub chat_id: i64,
}

impl ConversationKey {
    /// Key for a one-on-one conversation with the given user.
    pub fn private(user: UserId) -> Self {
        Self {
            scope: ScopeType::Private,
            chat_id: user.0,
        }
    }

    /// Key for a group conversation.
    pub fn group(chat_id: i64) -> Self {
        Self {
            scope: ScopeType::Group,
            chat_id,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.chat_id)
    }
}

impl FromStr for ConversationKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, chat_id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid conversation key: '{s}'"))?;
        Ok(Self {
            scope: scope.parse()?,
            chat_id: chat_id
                .parse()
                .map_err(|_| format!("invalid chat id in conversation key: '{s}'"))?,
        })
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.to_string()
    }
}

/// A single message unit in a conversation's history.
///
/// Immutable once appended; the id is a time-sortable UUID used to validate
/// that a summarized prefix still matches the live history at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn with a fresh id and the current timestamp.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Convenience constructor for a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Convenience constructor for an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One conversation's full state: ordered turns plus the running summary
/// and per-conversation overrides.
///
/// The turn sequence is append-only except for the summarizer's atomic
/// prefix replacement and the hard safety truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub turns: Vec<Turn>,
    /// Long-term memory produced by summarization (None until first compaction).
    pub summary: Option<String>,
    /// Preferred provider name; falls back to configured priority order.
    pub provider_override: Option<String>,
    /// Sampling temperature; falls back to the configured default.
    pub temperature_override: Option<f64>,
    /// System prompt; falls back to the configured default.
    pub system_prompt_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation for a key.
    pub fn new(key: ConversationKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            turns: Vec::new(),
            summary: None,
            provider_override: None,
            temperature_override: None,
            system_prompt_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn and bump the update timestamp.
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// Drop all turns and the summary; overrides survive a clear.
    pub fn clear_history(&mut self) {
        self.turns.clear();
        self.summary = None;
        self.updated_at = Utc::now();
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

/// An inbound message handed to the core by external routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: ConversationKey,
    pub user: UserId,
    /// Speaker display name, used to attribute group turns.
    pub display_name: Option<String>,
    pub text: String,
}

/// The result of a successfully processed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyOutcome {
    pub conversation_key: ConversationKey,
    pub reply: String,
    /// Provider that produced the reply.
    pub provider: String,
    /// Model the provider used.
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_type_roundtrip() {
        for scope in [ScopeType::Private, ScopeType::Group] {
            let s = scope.to_string();
            let parsed: ScopeType = s.parse().unwrap();
            assert_eq!(scope, parsed);
        }
    }

    #[test]
    fn test_permission_tier_roundtrip() {
        for tier in [
            PermissionTier::User,
            PermissionTier::Admin,
            PermissionTier::SuperAdmin,
        ] {
            let s = tier.to_string();
            let parsed: PermissionTier = s.parse().unwrap();
            assert_eq!(tier, parsed);
        }
    }

    #[test]
    fn test_permission_tier_privilege() {
        assert!(!PermissionTier::User.is_privileged());
        assert!(PermissionTier::Admin.is_privileged());
        assert!(PermissionTier::SuperAdmin.is_privileged());
    }

    #[test]
    fn test_conversation_key_display_parse() {
        let key = ConversationKey::private(UserId(42));
        assert_eq!(key.to_string(), "private:42");
        let parsed: ConversationKey = "private:42".parse().unwrap();
        assert_eq!(parsed, key);

        let group = ConversationKey::group(-1001234);
        assert_eq!(group.to_string(), "group:-1001234");
        let parsed: ConversationKey = "group:-1001234".parse().unwrap();
        assert_eq!(parsed, group);
    }

    #[test]
    fn test_conversation_key_parse_rejects_garbage() {
        assert!("private".parse::<ConversationKey>().is_err());
        assert!("town:12".parse::<ConversationKey>().is_err());
        assert!("group:twelve".parse::<ConversationKey>().is_err());
    }

    #[test]
    fn test_conversation_key_serde_as_string() {
        let key = ConversationKey::group(7);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"group:7\"");
        let parsed: ConversationKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_turn_constructors() {
        let turn = Turn::user("hello");
        assert_eq!(turn.role, MessageRole::User);
        assert_eq!(turn.content, "hello");

        let reply = Turn::assistant("hi");
        assert_eq!(reply.role, MessageRole::Assistant);
    }

    #[test]
    fn test_conversation_push_and_clear() {
        let mut convo = Conversation::new(ConversationKey::private(UserId(1)));
        assert_eq!(convo.turn_count(), 0);

        convo.push_turn(Turn::user("hello"));
        convo.push_turn(Turn::assistant("hi"));
        convo.summary = Some("greeting".to_string());
        convo.provider_override = Some("grok".to_string());
        assert_eq!(convo.turn_count(), 2);

        convo.clear_history();
        assert_eq!(convo.turn_count(), 0);
        assert!(convo.summary.is_none());
        // Overrides are settings, not history.
        assert_eq!(convo.provider_override.as_deref(), Some("grok"));
    }

    #[test]
    fn test_conversation_serialize() {
        let mut convo = Conversation::new(ConversationKey::private(UserId(9)));
        convo.push_turn(Turn::user("ping"));
        let json = serde_json::to_string(&convo).unwrap();
        assert!(json.contains("\"key\":\"private:9\""));
        assert!(json.contains("\"role\":\"user\""));
    }
}
