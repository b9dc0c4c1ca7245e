//! Summarization of older conversation turns into long-term memory.
//!
//! `ContextSummarizer` condenses a prefix of turns into prose that replaces
//! them in the prompt. The existing summary (if any) is folded in, so a
//! conversation's memory is always one summary, never a chain of them.

use tracing::debug;

use colloquy_types::llm::{CompletionRequest, LlmError, Message, MessageRole};
use colloquy_types::conversation::Turn;

use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::router::strip_reasoning;

/// System prompt for the summarization LLM call.
const SUMMARY_SYSTEM_PROMPT: &str = r#"You are condensing an ongoing conversation into long-term memory. Preserve:
1. Facts established about the user and their situation
2. Decisions, commitments, and conclusions reached
3. The emotional tone and how the relationship has developed
4. Unresolved questions and open threads

Merge the previous memory (if given) with the new turns into a single coherent account. Keep it under 300 words. Write in third person (e.g., "The user mentioned..." "The assistant suggested...")."#;

/// Temperature for summarization; kept low for fidelity, independent of
/// the conversation's own temperature setting.
const SUMMARY_TEMPERATURE: f64 = 0.3;

const SUMMARY_MAX_TOKENS: u32 = 1024;

/// Stateless utility for summarizing conversation history.
pub struct ContextSummarizer;

impl ContextSummarizer {
    /// Summarize `turns` (folding in `existing_summary`) into new memory
    /// text.
    ///
    /// Reasoning markers are stripped from turn content before it reaches
    /// the summarizer. An empty result counts as a failure; the caller's
    /// history stays intact either way.
    #[tracing::instrument(
        name = "summarize_context",
        skip(provider, existing_summary, turns),
        fields(
            provider = %provider.name(),
            turn_count = turns.len(),
        )
    )]
    pub async fn summarize(
        provider: &BoxLlmProvider,
        existing_summary: Option<&str>,
        turns: &[Turn],
    ) -> Result<String, LlmError> {
        if turns.is_empty() {
            return Err(LlmError::InvalidRequest(
                "nothing to summarize".to_string(),
            ));
        }

        let transcript: String = turns
            .iter()
            .map(|turn| {
                let (content, _) = strip_reasoning(&turn.content);
                format!("{}: {}", turn.role, content)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut prompt = String::new();
        if let Some(summary) = existing_summary {
            prompt.push_str(&format!(
                "Previous memory:\n<memory>\n{summary}\n</memory>\n\n"
            ));
        }
        prompt.push_str(&format!(
            "New conversation turns:\n<conversation>\n{transcript}\n</conversation>"
        ));

        let request = CompletionRequest {
            model: String::new(),
            messages: vec![Message::new(MessageRole::User, prompt)],
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: Some(SUMMARY_TEMPERATURE),
        };

        let response = provider.complete(&request).await?;
        let (summary, _) = strip_reasoning(&response.content);
        if summary.is_empty() {
            return Err(LlmError::Provider {
                message: "summarizer returned an empty summary".to_string(),
            });
        }
        debug!(summary_chars = summary.len(), "summarization complete");
        Ok(summary)
    }
}
