//! The message pipeline: sequencing, quota, prompt assembly, routing,
//! and history compaction, in one place.
//!
//! `ChatService` is generic over its persistence seams so the pipeline is
//! testable without a database: `R` loads and saves conversations (via the
//! cache), `S` holds per-conversation settings, and `A` resolves identity
//! tiers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use colloquy_types::config::GatewayConfig;
use colloquy_types::conversation::{
    Conversation, ConversationKey, InboundMessage, PermissionTier, ReplyOutcome, ScopeType, Turn,
    UserId,
};
use colloquy_types::error::{ChatError, RepositoryError};
use colloquy_types::event::AuditEvent;
use colloquy_types::llm::{CompletionRequest, LlmError, Message, MessageRole};

use crate::audit::writelog::AsyncWriteLog;
use crate::chat::cache::ContextCache;
use crate::chat::repository::{AccessControl, ConversationRepository, SettingsRepository};
use crate::chat::sequencer::ChatSequencer;
use crate::llm::router::ProviderRouter;
use crate::quota::limiter::{QuotaDecision, QuotaStats, RateLimiter};
use crate::summary::policy::{self, HistoryAction, HistoryPolicy};
use crate::summary::summarizer::ContextSummarizer;

/// Requested output budget per reply; each attempt clamps this to the
/// provider's own maximum.
const REPLY_MAX_TOKENS: u32 = 4096;

/// Current override settings for one conversation.
#[derive(Debug, Clone)]
pub struct SettingsOverview {
    pub system_prompt: Option<String>,
    pub provider: Option<String>,
    pub temperature: Option<f64>,
}

/// Orchestrates the full lifecycle of inbound messages.
pub struct ChatService<R, S, A>
where
    R: ConversationRepository + 'static,
    S: SettingsRepository,
    A: AccessControl,
{
    config: Arc<GatewayConfig>,
    sequencer: Arc<ChatSequencer>,
    cache: Arc<ContextCache<R>>,
    router: Arc<ProviderRouter>,
    limiter: Arc<RateLimiter>,
    write_log: Arc<AsyncWriteLog>,
    policy: HistoryPolicy,
    settings: S,
    access: A,
}

impl<R, S, A> ChatService<R, S, A>
where
    R: ConversationRepository + 'static,
    S: SettingsRepository,
    A: AccessControl,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<GatewayConfig>,
        sequencer: Arc<ChatSequencer>,
        cache: Arc<ContextCache<R>>,
        router: Arc<ProviderRouter>,
        limiter: Arc<RateLimiter>,
        write_log: Arc<AsyncWriteLog>,
        settings: S,
        access: A,
    ) -> Self {
        let policy = HistoryPolicy::new(config.history.clone());
        Self {
            config,
            sequencer,
            cache,
            router,
            limiter,
            write_log,
            policy,
            settings,
            access,
        }
    }

    /// Process one inbound message end to end and return the reply.
    ///
    /// Everything that mutates conversation state runs inside the
    /// conversation's slot; a slot wait past the configured bound returns
    /// [`ChatError::LockTimeout`] with nothing consumed or written.
    pub async fn process_message(
        &self,
        message: InboundMessage,
    ) -> Result<ReplyOutcome, ChatError> {
        let tier = self.require_tier(message.user).await?;
        if message.text.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message text is empty".to_string()));
        }
        let key = message.key;
        self.sequencer
            .run(key, self.config.slot_wait(), self.reply_pipeline(message, tier))
            .await?
    }

    async fn reply_pipeline(
        &self,
        message: InboundMessage,
        tier: PermissionTier,
    ) -> Result<ReplyOutcome, ChatError> {
        let key = message.key;

        // Quota is checked inside the slot: a message that timed out on
        // the slot must not have consumed anything.
        if let QuotaDecision::Exceeded {
            window,
            limit,
            reset_at,
        } = self.limiter.check_and_consume(message.user, tier, Utc::now())
        {
            debug!(%key, user = %message.user, %window, "quota exceeded");
            return Err(ChatError::QuotaExceeded {
                window,
                limit,
                reset_at,
            });
        }

        let mut conversation = self.cache.get_or_create(key).await?;

        let content = match key.scope {
            ScopeType::Group => {
                let speaker = match &message.display_name {
                    Some(name) => format!("{name} ({})", message.user),
                    None => message.user.to_string(),
                };
                format!("[{speaker}]: {}", message.text)
            }
            ScopeType::Private => message.text.clone(),
        };
        let user_turn = Turn::user(content);
        let user_content = user_turn.content.clone();
        conversation.push_turn(user_turn);

        self.apply_history_policy(key, &mut conversation).await;

        self.write_log.enqueue(AuditEvent::TurnRecorded {
            conversation_key: key,
            user_id: message.user,
            role: MessageRole::User,
            provider: None,
            content: user_content,
        });

        let request = self.assemble_request(&conversation);
        let routed = self
            .router
            .complete(&request, conversation.provider_override.as_deref())
            .await?;
        if let Some(reasoning) = &routed.reasoning {
            debug!(%key, provider = %routed.provider, chars = reasoning.len(), "stripped reasoning segment");
        }

        let assistant_turn = Turn::assistant(routed.reply.clone());
        conversation.push_turn(assistant_turn);
        if let Err(error) = self.cache.update(key, conversation, false).await {
            warn!(%key, %error, "deferred save failed, reply kept in cache");
        }

        self.write_log.enqueue(AuditEvent::TurnRecorded {
            conversation_key: key,
            user_id: message.user,
            role: MessageRole::Assistant,
            provider: Some(routed.provider.clone()),
            content: routed.reply.clone(),
        });
        self.write_log.enqueue(AuditEvent::UsageRecorded {
            conversation_key: key,
            user_id: message.user,
            provider: routed.provider.clone(),
            model: routed.model.clone(),
            total_tokens: routed.usage.total_tokens(),
        });

        info!(
            %key,
            user = %message.user,
            provider = %routed.provider,
            tokens = routed.usage.total_tokens(),
            "reply produced"
        );
        Ok(ReplyOutcome {
            conversation_key: key,
            reply: routed.reply,
            provider: routed.provider,
            model: routed.model,
        })
    }

    /// Evaluate truncation/summarization for a history that just grew, and
    /// store the (possibly truncated) state back into the cache.
    async fn apply_history_policy(&self, key: ConversationKey, conversation: &mut Conversation) {
        let cooldown = self.cache.summary_cooldown(key).await;
        let action = self
            .policy
            .evaluate(key.scope, conversation.turn_count(), cooldown);
        if cooldown > 0 {
            self.cache.set_summary_cooldown(key, cooldown - 1).await;
        }

        let (store_forced, summarize_prefix) = match action {
            HistoryAction::Truncate { keep_last } => {
                let drop_count = conversation.turns.len().saturating_sub(keep_last);
                if drop_count > 0 {
                    warn!(%key, dropped = drop_count, "history past bounds, truncating");
                    conversation.turns.drain(..drop_count);
                }
                (true, None)
            }
            HistoryAction::Summarize { prefix_len } => (false, Some(prefix_len)),
            HistoryAction::None => (false, None),
        };

        if let Err(error) = self
            .cache
            .update(key, conversation.clone(), store_forced)
            .await
        {
            warn!(%key, %error, "deferred save failed, continuing with cached state");
        }

        if let Some(prefix_len) = summarize_prefix {
            if self.cache.try_begin_summary(key).await {
                let prefix = conversation.turns[..prefix_len].to_vec();
                self.spawn_summarization(key, prefix, conversation.summary.clone());
            }
        }
    }

    fn assemble_request(&self, conversation: &Conversation) -> CompletionRequest {
        let mut system = conversation
            .system_prompt_override
            .clone()
            .unwrap_or_else(|| self.config.default_system_prompt.clone());
        if !self.config.extra_system_prompt.is_empty() {
            system.push('\n');
            system.push_str(&self.config.extra_system_prompt);
        }

        let mut messages = Vec::with_capacity(conversation.turns.len() + 1);
        if let Some(summary) = &conversation.summary {
            messages.push(Message::new(
                MessageRole::System,
                format!("[Long-term memory] {summary}"),
            ));
        }
        messages.extend(
            conversation
                .turns
                .iter()
                .map(|turn| Message::new(turn.role, turn.content.clone())),
        );

        CompletionRequest {
            model: String::new(),
            messages,
            system: Some(system),
            max_tokens: REPLY_MAX_TOKENS,
            temperature: Some(
                conversation
                    .temperature_override
                    .unwrap_or(self.config.default_temperature),
            ),
        }
    }

    /// Summarize `prefix` off-slot, then commit under the slot only if the
    /// prefix is still intact.
    fn spawn_summarization(
        &self,
        key: ConversationKey,
        prefix: Vec<Turn>,
        existing_summary: Option<String>,
    ) {
        let cache = self.cache.clone();
        let sequencer = self.sequencer.clone();
        let router = self.router.clone();
        let write_log = self.write_log.clone();
        let failure_cooldown = self.config.history.summary_failure_cooldown;

        tokio::spawn(async move {
            let result = match router.summary_provider() {
                Some(provider) => {
                    ContextSummarizer::summarize(provider, existing_summary.as_deref(), &prefix)
                        .await
                }
                None => Err(LlmError::InvalidRequest(
                    "no summarization-capable provider configured".to_string(),
                )),
            };
            match result {
                Ok(summary) => {
                    sequencer
                        .run_unbounded(key, async {
                            match cache.get_or_create(key).await {
                                Ok(mut conversation) => {
                                    if policy::prefix_matches(&conversation.turns, &prefix) {
                                        let compacted = prefix.len();
                                        conversation.turns.drain(..compacted);
                                        conversation.summary = Some(summary.clone());
                                        if let Err(error) =
                                            cache.update(key, conversation, true).await
                                        {
                                            warn!(%key, %error, "summary commit save deferred");
                                        }
                                        info!(%key, compacted, "summary committed");
                                        write_log.enqueue(AuditEvent::SummaryCompacted {
                                            conversation_key: key,
                                            turns_compacted: compacted as u32,
                                            summary_chars: summary.len() as u32,
                                        });
                                    } else {
                                        debug!(%key, "history changed during summarization, commit abandoned");
                                    }
                                }
                                Err(error) => {
                                    warn!(%key, %error, "conversation unavailable for summary commit");
                                }
                            }
                        })
                        .await;
                }
                Err(error) => {
                    warn!(%key, %error, cooldown = failure_cooldown, "summarization failed, keeping verbatim history");
                    cache.set_summary_cooldown(key, failure_cooldown).await;
                }
            }
            cache.end_summary(key).await;
        });
    }

    /// Reset a conversation's history and summary; overrides survive.
    /// Group conversations require a privileged tier.
    pub async fn clear_conversation(
        &self,
        key: ConversationKey,
        user: UserId,
    ) -> Result<(), ChatError> {
        let tier = self.require_tier(user).await?;
        if key.scope == ScopeType::Group && !tier.is_privileged() {
            return Err(ChatError::Unauthorized);
        }
        self.sequencer
            .run(key, self.config.slot_wait(), async {
                let mut conversation = self.cache.get_or_create(key).await?;
                conversation.clear_history();
                if let Err(error) = self.cache.update(key, conversation, true).await {
                    warn!(%key, %error, "clear persisted to cache only, flush pending");
                }
                self.cache.set_summary_cooldown(key, 0).await;
                Ok::<(), ChatError>(())
            })
            .await??;
        info!(%key, user = %user, "conversation cleared");
        self.write_log.enqueue(AuditEvent::ConversationCleared {
            conversation_key: key,
            user_id: user,
        });
        Ok(())
    }

    /// Pin (or with `None`, unpin) the conversation's preferred provider.
    /// Returns the canonical name stored.
    pub async fn set_provider_preference(
        &self,
        key: ConversationKey,
        user: UserId,
        provider: Option<&str>,
    ) -> Result<Option<String>, ChatError> {
        self.require_tier(user).await?;
        let canonical = match provider {
            Some(name) => Some(
                self.router
                    .resolve(name)
                    .ok_or_else(|| ChatError::UnknownProvider(name.to_string()))?
                    .to_string(),
            ),
            None => None,
        };
        self.settings
            .set_provider_preference(key, canonical.as_deref())
            .await?;
        self.mirror_override(key, |conversation| {
            conversation.provider_override = canonical.clone();
        })
        .await?;
        self.write_log.enqueue(AuditEvent::ProviderPreferenceSet {
            conversation_key: key,
            user_id: user,
            provider: canonical.clone(),
        });
        info!(%key, user = %user, provider = ?canonical, "provider preference set");
        Ok(canonical)
    }

    /// Set (or with `None`, clear) the conversation's system prompt.
    pub async fn set_system_prompt(
        &self,
        key: ConversationKey,
        user: UserId,
        prompt: Option<&str>,
    ) -> Result<(), ChatError> {
        self.require_tier(user).await?;
        if let Some(text) = prompt {
            if text.trim().is_empty() {
                return Err(ChatError::InvalidRequest("prompt is empty".to_string()));
            }
            let chars = text.chars().count();
            if chars > self.config.max_prompt_length {
                return Err(ChatError::InvalidRequest(format!(
                    "prompt is {chars} characters, limit is {}",
                    self.config.max_prompt_length
                )));
            }
        }
        self.settings.set_system_prompt(key, prompt).await?;
        let stored = prompt.map(str::to_string);
        self.mirror_override(key, |conversation| {
            conversation.system_prompt_override = stored.clone();
        })
        .await?;
        info!(%key, user = %user, cleared = prompt.is_none(), "system prompt updated");
        Ok(())
    }

    /// Set (or with `None`, clear) the conversation's sampling temperature.
    pub async fn set_temperature(
        &self,
        key: ConversationKey,
        user: UserId,
        temperature: Option<f64>,
    ) -> Result<(), ChatError> {
        self.require_tier(user).await?;
        if let Some(value) = temperature {
            if !(0.0..=2.0).contains(&value) {
                return Err(ChatError::InvalidRequest(format!(
                    "temperature {value} is outside 0.0..=2.0"
                )));
            }
        }
        self.settings.set_temperature(key, temperature).await?;
        self.mirror_override(key, |conversation| {
            conversation.temperature_override = temperature;
        })
        .await?;
        info!(%key, user = %user, ?temperature, "temperature updated");
        Ok(())
    }

    /// Current override settings as persisted.
    pub async fn settings_overview(
        &self,
        key: ConversationKey,
    ) -> Result<SettingsOverview, ChatError> {
        Ok(SettingsOverview {
            system_prompt: self.settings.system_prompt(key).await?,
            provider: self.settings.provider_preference(key).await?,
            temperature: self.settings.temperature(key).await?,
        })
    }

    /// Quota usage for an identity (requires the identity to be known).
    pub async fn quota_stats(&self, user: UserId) -> Result<QuotaStats, ChatError> {
        let tier = self.require_tier(user).await?;
        Ok(self.limiter.stats(user, tier, Utc::now()))
    }

    /// One maintenance pass across cache, limiter, and sequencer.
    pub async fn run_maintenance(&self) {
        self.cache.maintenance().await;
        self.limiter.maybe_sweep(Utc::now());
        self.sequencer.prune_idle(self.config.slot_ttl());
    }

    /// Flush every dirty conversation; used at shutdown.
    pub async fn flush_all(&self) -> Vec<(ConversationKey, RepositoryError)> {
        self.cache.flush_all().await
    }

    async fn require_tier(&self, user: UserId) -> Result<PermissionTier, ChatError> {
        self.access
            .permission_tier(user)
            .await?
            .ok_or(ChatError::Unauthorized)
    }

    /// Mirror a settings change into the cached conversation, under the
    /// slot, so in-flight prompt assembly never sees a half-applied state.
    /// A non-resident conversation needs nothing; it loads fresh settings.
    async fn mirror_override(
        &self,
        key: ConversationKey,
        apply: impl FnOnce(&mut Conversation),
    ) -> Result<(), ChatError> {
        self.sequencer
            .run(key, self.config.slot_wait(), async {
                if !self.cache.contains(key).await {
                    return;
                }
                match self.cache.get_or_create(key).await {
                    Ok(mut conversation) => {
                        apply(&mut conversation);
                        if let Err(error) = self.cache.update(key, conversation, false).await {
                            warn!(%key, %error, "override mirror save deferred");
                        }
                    }
                    Err(error) => warn!(%key, %error, "could not mirror override into cache"),
                }
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::llm::provider::LlmProvider;
    use crate::llm::router::RouterEntry;
    use colloquy_types::config::{CacheConfig, HistoryConfig, QuotaConfig};
    use colloquy_types::llm::{CompletionResponse, ProviderCapabilities, Usage};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct MemoryRepo {
        stored: Arc<StdMutex<HashMap<ConversationKey, Conversation>>>,
    }

    impl ConversationRepository for MemoryRepo {
        async fn load(
            &self,
            key: ConversationKey,
        ) -> Result<Option<Conversation>, RepositoryError> {
            Ok(self.stored.lock().unwrap().get(&key).cloned())
        }

        async fn save(
            &self,
            key: ConversationKey,
            conversation: &Conversation,
        ) -> Result<(), RepositoryError> {
            self.stored
                .lock()
                .unwrap()
                .insert(key, conversation.clone());
            Ok(())
        }
    }

    type SettingsRow = (Option<String>, Option<String>, Option<f64>);

    #[derive(Clone, Default)]
    struct MemorySettings {
        rows: Arc<StdMutex<HashMap<ConversationKey, SettingsRow>>>,
    }

    impl SettingsRepository for MemorySettings {
        async fn system_prompt(
            &self,
            key: ConversationKey,
        ) -> Result<Option<String>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&key)
                .and_then(|row| row.0.clone()))
        }

        async fn set_system_prompt(
            &self,
            key: ConversationKey,
            prompt: Option<&str>,
        ) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().entry(key).or_default().0 = prompt.map(str::to_string);
            Ok(())
        }

        async fn provider_preference(
            &self,
            key: ConversationKey,
        ) -> Result<Option<String>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&key)
                .and_then(|row| row.1.clone()))
        }

        async fn set_provider_preference(
            &self,
            key: ConversationKey,
            provider: Option<&str>,
        ) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().entry(key).or_default().1 = provider.map(str::to_string);
            Ok(())
        }

        async fn temperature(
            &self,
            key: ConversationKey,
        ) -> Result<Option<f64>, RepositoryError> {
            Ok(self.rows.lock().unwrap().get(&key).and_then(|row| row.2))
        }

        async fn set_temperature(
            &self,
            key: ConversationKey,
            temperature: Option<f64>,
        ) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().entry(key).or_default().2 = temperature;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct StaticAccess {
        tiers: Arc<StdMutex<HashMap<i64, PermissionTier>>>,
    }

    impl StaticAccess {
        fn with(pairs: &[(i64, PermissionTier)]) -> Self {
            let access = Self::default();
            for (id, tier) in pairs {
                access.tiers.lock().unwrap().insert(*id, *tier);
            }
            access
        }
    }

    impl AccessControl for StaticAccess {
        async fn permission_tier(
            &self,
            user: UserId,
        ) -> Result<Option<PermissionTier>, RepositoryError> {
            Ok(self.tiers.lock().unwrap().get(&user.0).copied())
        }
    }

    struct StaticProvider {
        name: String,
        reply: String,
        capabilities: ProviderCapabilities,
    }

    impl LlmProvider for StaticProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "static-model"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.capabilities
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                id: "static".to_string(),
                content: self.reply.clone(),
                model: "static-model".to_string(),
                usage: Usage {
                    input_tokens: 20,
                    output_tokens: 10,
                },
            })
        }
    }

    #[derive(Clone, Default)]
    struct NullSink;

    impl crate::audit::writelog::EventSink for NullSink {
        async fn append(&self, _event: &AuditEvent) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    struct Harness {
        service: Arc<ChatService<MemoryRepo, MemorySettings, StaticAccess>>,
        cache: Arc<ContextCache<MemoryRepo>>,
        settings: MemorySettings,
    }

    fn harness(config: GatewayConfig) -> Harness {
        harness_with_provider(config, "pong")
    }

    fn harness_with_provider(config: GatewayConfig, reply: &str) -> Harness {
        let config = Arc::new(config);
        let repo = MemoryRepo::default();
        let cache = Arc::new(ContextCache::new(repo, CacheConfig::default()));
        let sequencer = Arc::new(ChatSequencer::new());
        let router = Arc::new(ProviderRouter::new(
            vec![RouterEntry {
                provider: BoxLlmProvider::new(StaticProvider {
                    name: "alpha".to_string(),
                    reply: reply.to_string(),
                    capabilities: ProviderCapabilities::default(),
                }),
                priority: 0,
                enabled: true,
            }],
            Duration::from_secs(30),
            None,
        ));
        let limiter = Arc::new(RateLimiter::new(config.quota.clone()));
        let write_log = Arc::new(AsyncWriteLog::spawn(NullSink, config.write_log.clone()));
        let settings = MemorySettings::default();
        let access = StaticAccess::with(&[
            (1, PermissionTier::User),
            (2, PermissionTier::Admin),
        ]);
        let service = Arc::new(ChatService::new(
            config,
            sequencer,
            cache.clone(),
            router,
            limiter,
            write_log,
            settings.clone(),
            access,
        ));
        Harness {
            service,
            cache,
            settings,
        }
    }

    fn private_message(user: i64, text: &str) -> InboundMessage {
        InboundMessage {
            key: ConversationKey::private(UserId(user)),
            user: UserId(user),
            display_name: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_reply_appends_both_turns() {
        let h = harness(GatewayConfig::default());
        let outcome = h
            .service
            .process_message(private_message(1, "hello"))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "pong");
        assert_eq!(outcome.provider, "alpha");

        let key = ConversationKey::private(UserId(1));
        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(conversation.turns[0].content, "hello");
        assert_eq!(conversation.turns[0].role, MessageRole::User);
        assert_eq!(conversation.turns[1].content, "pong");
        assert_eq!(conversation.turns[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_refused_untouched() {
        let h = harness(GatewayConfig::default());
        let result = h.service.process_message(private_message(99, "hi")).await;
        assert!(matches!(result, Err(ChatError::Unauthorized)));
        assert!(h.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let h = harness(GatewayConfig::default());
        let result = h.service.process_message(private_message(1, "   ")).await;
        assert!(matches!(result, Err(ChatError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_group_turns_carry_speaker_attribution() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::group(-500);
        h.service
            .process_message(InboundMessage {
                key,
                user: UserId(1),
                display_name: Some("Ana".to_string()),
                text: "hi all".to_string(),
            })
            .await
            .unwrap();

        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert_eq!(conversation.turns[0].content, "[Ana (1)]: hi all");

        // Without a display name, the bare id attributes the turn.
        h.service
            .process_message(InboundMessage {
                key,
                user: UserId(2),
                display_name: None,
                text: "hello".to_string(),
            })
            .await
            .unwrap();
        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert_eq!(conversation.turns[2].content, "[2]: hello");
    }

    #[tokio::test]
    async fn test_quota_refusal_carries_reset_time() {
        let config = GatewayConfig {
            quota: QuotaConfig {
                hourly_limit: 1,
                daily_limit: 100,
                sweep_interval_secs: 7200,
            },
            ..GatewayConfig::default()
        };
        let h = harness(config);
        h.service
            .process_message(private_message(1, "one"))
            .await
            .unwrap();
        let result = h.service.process_message(private_message(1, "two")).await;
        match result {
            Err(ChatError::QuotaExceeded { limit, .. }) => assert_eq!(limit, 1),
            other => panic!("unexpected: {other:?}"),
        }

        // Admins are never limited.
        for _ in 0..3 {
            h.service
                .process_message(private_message(2, "go"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_clear_requires_privilege_in_groups() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::group(-500);
        h.service
            .process_message(InboundMessage {
                key,
                user: UserId(1),
                display_name: None,
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        let denied = h.service.clear_conversation(key, UserId(1)).await;
        assert!(matches!(denied, Err(ChatError::Unauthorized)));

        h.service.clear_conversation(key, UserId(2)).await.unwrap();
        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert!(conversation.turns.is_empty());
        assert!(conversation.summary.is_none());
    }

    #[tokio::test]
    async fn test_clear_private_keeps_overrides() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::private(UserId(1));
        h.service
            .set_provider_preference(key, UserId(1), Some("alpha"))
            .await
            .unwrap();
        h.service
            .process_message(private_message(1, "hi"))
            .await
            .unwrap();
        h.service.clear_conversation(key, UserId(1)).await.unwrap();

        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert!(conversation.turns.is_empty());
        assert_eq!(conversation.provider_override.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_provider_preference_is_validated_and_canonicalized() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::private(UserId(1));

        let unknown = h
            .service
            .set_provider_preference(key, UserId(1), Some("parrot"))
            .await;
        assert!(matches!(unknown, Err(ChatError::UnknownProvider(_))));

        let stored = h
            .service
            .set_provider_preference(key, UserId(1), Some("ALPHA"))
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some("alpha"));
        let overview = h.service.settings_overview(key).await.unwrap();
        assert_eq!(overview.provider.as_deref(), Some("alpha"));

        h.service
            .set_provider_preference(key, UserId(1), None)
            .await
            .unwrap();
        let overview = h.service.settings_overview(key).await.unwrap();
        assert!(overview.provider.is_none());
    }

    #[tokio::test]
    async fn test_system_prompt_length_is_bounded() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::private(UserId(1));

        let long = "x".repeat(61);
        let result = h
            .service
            .set_system_prompt(key, UserId(1), Some(&long))
            .await;
        assert!(matches!(result, Err(ChatError::InvalidRequest(_))));

        h.service
            .set_system_prompt(key, UserId(1), Some("Be terse."))
            .await
            .unwrap();
        let overview = h.service.settings_overview(key).await.unwrap();
        assert_eq!(overview.system_prompt.as_deref(), Some("Be terse."));
        assert!(h
            .settings
            .rows
            .lock()
            .unwrap()
            .contains_key(&key));
    }

    #[tokio::test]
    async fn test_temperature_is_bounded() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::private(UserId(1));
        assert!(h
            .service
            .set_temperature(key, UserId(1), Some(2.5))
            .await
            .is_err());
        h.service
            .set_temperature(key, UserId(1), Some(0.7))
            .await
            .unwrap();
        let overview = h.service.settings_overview(key).await.unwrap();
        assert_eq!(overview.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_summarization_compacts_long_private_history() {
        let config = GatewayConfig {
            history: HistoryConfig {
                summary_trigger_private: 6,
                summary_retain_private: 2,
                group_history_limit: 20,
                max_turns_safety_limit: 100,
                summary_failure_cooldown: 5,
            },
            ..GatewayConfig::default()
        };
        let h = harness_with_provider(config, "A tidy summary.");
        let key = ConversationKey::private(UserId(1));

        // Each message adds two turns; the 4th message pushes the count to
        // 7 before the reply, crossing the trigger.
        for i in 0..4 {
            h.service
                .process_message(private_message(1, &format!("msg {i}")))
                .await
                .unwrap();
        }

        let compacted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let conversation = h.cache.get_or_create(key).await.unwrap();
                if conversation.summary.is_some() {
                    break conversation;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("summary never committed");

        assert_eq!(compacted.summary.as_deref(), Some("A tidy summary."));
        // 8 turns total after the 4th reply, minus the 5-turn prefix.
        assert_eq!(compacted.turns.len(), 3);
    }

    #[tokio::test]
    async fn test_group_history_is_truncated_not_summarized() {
        let config = GatewayConfig {
            history: HistoryConfig {
                summary_trigger_private: 35,
                summary_retain_private: 15,
                group_history_limit: 4,
                max_turns_safety_limit: 100,
                summary_failure_cooldown: 5,
            },
            ..GatewayConfig::default()
        };
        let h = harness(config);
        let key = ConversationKey::group(-7);

        for i in 0..4 {
            h.service
                .process_message(InboundMessage {
                    key,
                    user: UserId(1),
                    display_name: None,
                    text: format!("msg {i}"),
                })
                .await
                .unwrap();
        }
        let conversation = h.cache.get_or_create(key).await.unwrap();
        // Cap of 4 applies when the history grows past it on arrival.
        assert!(conversation.turns.len() <= 5);
        assert!(conversation.summary.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_messages_to_one_conversation_all_land() {
        let h = harness(GatewayConfig::default());
        let key = ConversationKey::private(UserId(1));

        let mut handles = Vec::new();
        for i in 0..5 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .process_message(private_message(1, &format!("msg {i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let conversation = h.cache.get_or_create(key).await.unwrap();
        assert_eq!(conversation.turns.len(), 10);
        // Strict alternation: each user turn is answered before the next.
        for (index, turn) in conversation.turns.iter().enumerate() {
            let expected = if index % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            assert_eq!(turn.role, expected);
        }
    }

    #[tokio::test]
    async fn test_quota_stats_roundup() {
        let h = harness(GatewayConfig::default());
        h.service
            .process_message(private_message(1, "hello"))
            .await
            .unwrap();
        let stats = h.service.quota_stats(UserId(1)).await.unwrap();
        assert!(!stats.privileged);
        assert_eq!(stats.hourly_used, 1);
        assert_eq!(stats.daily_used, 1);

        let admin = h.service.quota_stats(UserId(2)).await.unwrap();
        assert!(admin.privileged);
    }
}
