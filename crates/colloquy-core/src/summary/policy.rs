//! Decides what happens to a conversation's history on each new message.
//!
//! Three regimes, checked in order:
//! 1. Hard safety cap: over `max_turns_safety_limit`, truncate immediately
//!    regardless of scope or cooldown.
//! 2. Group scope: plain truncation to the last `group_history_limit`
//!    turns; groups are never summarized.
//! 3. Private scope: past `summary_trigger_private`, the prefix beyond the
//!    retained tail is scheduled for summarization, unless a failure
//!    cooldown is active.

use colloquy_types::config::HistoryConfig;
use colloquy_types::conversation::{ScopeType, Turn};

/// What the pipeline must do with the history it just extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    /// History is within bounds.
    None,
    /// Drop everything but the last `keep_last` turns, synchronously.
    Truncate { keep_last: usize },
    /// Schedule summarization of the first `prefix_len` turns.
    Summarize { prefix_len: usize },
}

/// Stateless evaluator over [`HistoryConfig`].
#[derive(Debug, Clone)]
pub struct HistoryPolicy {
    config: HistoryConfig,
}

impl HistoryPolicy {
    pub fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Evaluate the history after a turn has been appended.
    ///
    /// `cooldown` is the number of messages still to skip after a failed
    /// summarization; while it is nonzero only the safety cap applies.
    pub fn evaluate(&self, scope: ScopeType, turn_count: usize, cooldown: u32) -> HistoryAction {
        if turn_count > self.config.max_turns_safety_limit {
            return HistoryAction::Truncate {
                keep_last: self.config.summary_trigger_private,
            };
        }
        if cooldown > 0 {
            return HistoryAction::None;
        }
        match scope {
            ScopeType::Group => {
                if turn_count > self.config.group_history_limit {
                    HistoryAction::Truncate {
                        keep_last: self.config.group_history_limit,
                    }
                } else {
                    HistoryAction::None
                }
            }
            ScopeType::Private => {
                if turn_count <= self.config.summary_trigger_private {
                    return HistoryAction::None;
                }
                let prefix_len = turn_count.saturating_sub(self.config.summary_retain_private);
                if prefix_len == 0 {
                    HistoryAction::None
                } else {
                    HistoryAction::Summarize { prefix_len }
                }
            }
        }
    }
}

/// True if `prefix` is still the live history's prefix, by turn identity.
///
/// Checked under the conversation's slot right before a summary commit;
/// a mismatch means the history changed underneath the summarization
/// (a clear or truncation) and the commit must be abandoned.
pub fn prefix_matches(live: &[Turn], prefix: &[Turn]) -> bool {
    if prefix.is_empty() || live.len() < prefix.len() {
        return false;
    }
    live[0].id == prefix[0].id && live[prefix.len() - 1].id == prefix[prefix.len() - 1].id
}
