//! Durable audit events for Colloquy.
//!
//! Everything the asynchronous write log persists is one of these variants:
//! conversation turns, privileged actions, and usage records. Serialized
//! with a `type` tag so the event table stays queryable by kind.

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationKey, UserId};
use crate::llm::MessageRole;

/// An event destined for the durable event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A turn was appended to a conversation's history.
    TurnRecorded {
        conversation_key: ConversationKey,
        user_id: UserId,
        role: MessageRole,
        /// Provider that produced the turn (assistant turns only).
        provider: Option<String>,
        content: String,
    },

    /// A conversation's history and summary were reset.
    ConversationCleared {
        conversation_key: ConversationKey,
        user_id: UserId,
    },

    /// A summarization committed, replacing a prefix of turns.
    SummaryCompacted {
        conversation_key: ConversationKey,
        turns_compacted: u32,
        summary_chars: u32,
    },

    /// A conversation's preferred provider changed (None = cleared).
    ProviderPreferenceSet {
        conversation_key: ConversationKey,
        user_id: UserId,
        provider: Option<String>,
    },

    /// A reply was produced; totals for accounting.
    UsageRecorded {
        conversation_key: ConversationKey,
        user_id: UserId,
        provider: String,
        model: String,
        total_tokens: u32,
    },
}

impl AuditEvent {
    /// Stable kind string, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::TurnRecorded { .. } => "turn_recorded",
            AuditEvent::ConversationCleared { .. } => "conversation_cleared",
            AuditEvent::SummaryCompacted { .. } => "summary_compacted",
            AuditEvent::ProviderPreferenceSet { .. } => "provider_preference_set",
            AuditEvent::UsageRecorded { .. } => "usage_recorded",
        }
    }

    /// The conversation this event belongs to.
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            AuditEvent::TurnRecorded {
                conversation_key, ..
            }
            | AuditEvent::ConversationCleared {
                conversation_key, ..
            }
            | AuditEvent::SummaryCompacted {
                conversation_key, ..
            }
            | AuditEvent::ProviderPreferenceSet {
                conversation_key, ..
            }
            | AuditEvent::UsageRecorded {
                conversation_key, ..
            } => *conversation_key,
        }
    }

    /// The acting identity, when the event has one.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            AuditEvent::TurnRecorded { user_id, .. }
            | AuditEvent::ConversationCleared { user_id, .. }
            | AuditEvent::ProviderPreferenceSet { user_id, .. }
            | AuditEvent::UsageRecorded { user_id, .. } => Some(*user_id),
            AuditEvent::SummaryCompacted { .. } => None,
        }
    }
}
