//! Failover routing across configured providers.
//!
//! The router tries providers strictly in configured priority order (a
//! conversation's preferred provider jumps the queue), one attempt per
//! provider per message. Skips and failures are both recorded; when the
//! chain is exhausted the full list travels in
//! [`ChatError::AllProvidersFailed`] for the structured log, never for the
//! user-facing message.

use std::time::Duration;

use tracing::{debug, info, warn};

use colloquy_types::error::ChatError;
use colloquy_types::llm::{CompletionRequest, ProviderFailure, Usage};

use super::box_provider::BoxLlmProvider;

/// One provider in the failover order, with its routing attributes.
pub struct RouterEntry {
    pub provider: BoxLlmProvider,
    /// Lower is tried first; configuration order breaks ties.
    pub priority: u32,
    pub enabled: bool,
}

/// A successful completion after routing and reply post-processing.
#[derive(Debug, Clone)]
pub struct RoutedReply {
    /// Visible reply text, reasoning segments removed.
    pub reply: String,
    /// Stripped reasoning segments, kept for the structured log only.
    pub reasoning: Option<String>,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
}

/// Summary line for provider listings.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub priority: u32,
    pub enabled: bool,
    pub summarization: bool,
    pub reasoning: bool,
    pub max_context_tokens: u32,
}

/// Priority-ordered failover chain over type-erased providers.
pub struct ProviderRouter {
    entries: Vec<RouterEntry>,
    attempt_timeout: Duration,
    /// Canonical name of the configured summarization provider, if any.
    summary_provider: Option<String>,
}

impl ProviderRouter {
    pub fn new(
        mut entries: Vec<RouterEntry>,
        attempt_timeout: Duration,
        summary_provider: Option<&str>,
    ) -> Self {
        // Stable sort keeps configuration order for equal priorities.
        entries.sort_by_key(|entry| entry.priority);
        let summary_provider = summary_provider.and_then(|name| {
            let canonical = entries
                .iter()
                .find(|entry| entry.provider.name().eq_ignore_ascii_case(name))
                .map(|entry| entry.provider.name().to_string());
            if canonical.is_none() {
                warn!(name, "configured summary provider is unknown, falling back");
            }
            canonical
        });
        Self {
            entries,
            attempt_timeout,
            summary_provider,
        }
    }

    /// Resolve a user-supplied provider name (case-insensitive) to its
    /// canonical form.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.provider.name().eq_ignore_ascii_case(name))
            .map(|entry| entry.provider.name())
    }

    /// Route one completion through the chain.
    ///
    /// `preferred` (already canonical, from conversation settings) is tried
    /// first; the rest follow in priority order. Each attempt is bounded by
    /// the per-attempt timeout. Malformed and empty replies advance the
    /// chain like errors.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        preferred: Option<&str>,
    ) -> Result<RoutedReply, ChatError> {
        let mut failures: Vec<ProviderFailure> = Vec::new();

        for index in self.attempt_order(preferred) {
            let entry = &self.entries[index];
            let name = entry.provider.name();

            if !entry.enabled {
                failures.push(failure(name, "disabled"));
                continue;
            }
            let capabilities = entry.provider.capabilities();
            if !capabilities.chat {
                failures.push(failure(name, "chat not supported"));
                continue;
            }

            let mut attempt = request.clone();
            attempt.max_tokens = attempt.max_tokens.min(capabilities.max_output_tokens);
            let estimated = entry.provider.estimate_tokens(&attempt);
            if estimated > capabilities.max_context_tokens {
                failures.push(failure(
                    name,
                    format!(
                        "estimated {estimated} tokens exceeds context window of {}",
                        capabilities.max_context_tokens
                    ),
                ));
                continue;
            }

            debug!(provider = name, estimated, "attempting completion");
            match tokio::time::timeout(self.attempt_timeout, entry.provider.complete(&attempt))
                .await
            {
                Err(_) => {
                    warn!(
                        provider = name,
                        timeout_secs = self.attempt_timeout.as_secs(),
                        "provider attempt timed out"
                    );
                    failures.push(failure(
                        name,
                        format!("timed out after {}s", self.attempt_timeout.as_secs()),
                    ));
                }
                Ok(Err(error)) => {
                    warn!(provider = name, %error, "provider attempt failed");
                    failures.push(failure(name, error.to_string()));
                }
                Ok(Ok(response)) => {
                    let (reply, reasoning) = strip_reasoning(&response.content);
                    if reply.is_empty() {
                        warn!(provider = name, "provider returned an empty reply");
                        failures.push(failure(name, "empty reply"));
                        continue;
                    }
                    if !failures.is_empty() {
                        info!(
                            provider = name,
                            earlier_failures = failures.len(),
                            "completion succeeded after failover"
                        );
                    }
                    let model = if response.model.is_empty() {
                        entry.provider.model().to_string()
                    } else {
                        response.model
                    };
                    return Ok(RoutedReply {
                        reply,
                        reasoning,
                        provider: name.to_string(),
                        model,
                        usage: response.usage,
                    });
                }
            }
        }

        warn!(failures = failures.len(), "all providers failed");
        Err(ChatError::AllProvidersFailed(failures))
    }

    /// Provider used for summarization: the configured one, else the first
    /// summarization-capable entry by priority.
    pub fn summary_provider(&self) -> Option<&BoxLlmProvider> {
        if let Some(name) = &self.summary_provider {
            if let Some(entry) = self
                .entries
                .iter()
                .find(|entry| entry.enabled && entry.provider.name() == name)
            {
                return Some(&entry.provider);
            }
        }
        self.entries
            .iter()
            .find(|entry| entry.enabled && entry.provider.capabilities().summarization)
            .map(|entry| &entry.provider)
    }

    /// Listing for operator surfaces, in failover order.
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.entries
            .iter()
            .map(|entry| {
                let capabilities = entry.provider.capabilities();
                ProviderStatus {
                    name: entry.provider.name().to_string(),
                    model: entry.provider.model().to_string(),
                    priority: entry.priority,
                    enabled: entry.enabled,
                    summarization: capabilities.summarization,
                    reasoning: capabilities.reasoning,
                    max_context_tokens: capabilities.max_context_tokens,
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn attempt_order(&self, preferred: Option<&str>) -> Vec<usize> {
        let preferred_index = preferred.and_then(|name| {
            let found = self
                .entries
                .iter()
                .position(|entry| entry.provider.name().eq_ignore_ascii_case(name));
            if found.is_none() {
                warn!(name, "preferred provider no longer configured, using priority order");
            }
            found
        });
        let mut order = Vec::with_capacity(self.entries.len());
        if let Some(index) = preferred_index {
            order.push(index);
        }
        for index in 0..self.entries.len() {
            if Some(index) != preferred_index {
                order.push(index);
            }
        }
        order
    }
}

fn failure(provider: &str, reason: impl Into<String>) -> ProviderFailure {
    ProviderFailure {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// Remove `<think>...</think>` reasoning segments from a raw reply.
///
/// Returns the visible text (trimmed) and the concatenated stripped
/// segments. An unterminated opening marker swallows the rest of the text;
/// markers never leak into the visible reply.
pub fn strip_reasoning(raw: &str) -> (String, Option<String>) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut visible = String::new();
    let mut stripped = String::new();
    let mut rest = raw;
    while let Some(start) = rest.find(OPEN) {
        visible.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        match after.find(CLOSE) {
            Some(end) => {
                stripped.push_str(&after[..end]);
                rest = &after[end + CLOSE.len()..];
            }
            None => {
                stripped.push_str(after);
                rest = "";
            }
        }
    }
    visible.push_str(rest);
    let stripped = if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    };
    (visible.trim().to_string(), stripped)
}
