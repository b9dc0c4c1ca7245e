//! Gateway configuration types for Colloquy.
//!
//! `GatewayConfig` represents the top-level `colloquy.toml` that controls
//! prompts, history thresholds, cache bounds, quotas, and the provider
//! failover order. Every field has a default so a missing file still yields
//! a runnable (if providerless) gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::llm::ProviderConfig;

/// Top-level configuration for the gateway.
///
/// Loaded from `<data-dir>/colloquy.toml`. API keys are never stored here;
/// each provider entry names the environment variable that holds its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// System prompt used when a conversation has no override.
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    /// Hidden suffix appended to whichever system prompt is active.
    #[serde(default)]
    pub extra_system_prompt: String,

    /// Maximum length (chars) accepted for a per-conversation system prompt.
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,

    /// Sampling temperature used when a conversation has no override.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// Per-attempt timeout for provider completion calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long a caller waits for a conversation's exclusive slot, in seconds.
    #[serde(default = "default_slot_wait_secs")]
    pub slot_wait_secs: u64,

    /// Idle slots older than this are pruned by maintenance, in seconds.
    #[serde(default = "default_slot_ttl_secs")]
    pub slot_ttl_secs: u64,

    /// Identities always treated as super-admin, regardless of the store.
    #[serde(default)]
    pub super_admins: Vec<i64>,

    /// Failover order; priority field breaks ties with file order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Provider used for summarization; falls back to the first by priority.
    #[serde(default)]
    pub summary_provider: Option<String>,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub write_log: WriteLogConfig,
}

fn default_system_prompt() -> String {
    "You are a helpful chat assistant. Reply concisely and in first person.".to_string()
}

fn default_max_prompt_length() -> usize {
    60
}

fn default_temperature() -> f64 {
    1.0
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_slot_wait_secs() -> u64 {
    15
}

fn default_slot_ttl_secs() -> u64 {
    600
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn slot_wait(&self) -> Duration {
        Duration::from_secs(self.slot_wait_secs)
    }

    pub fn slot_ttl(&self) -> Duration {
        Duration::from_secs(self.slot_ttl_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: default_system_prompt(),
            extra_system_prompt: String::new(),
            max_prompt_length: default_max_prompt_length(),
            default_temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            slot_wait_secs: default_slot_wait_secs(),
            slot_ttl_secs: default_slot_ttl_secs(),
            super_admins: Vec::new(),
            providers: Vec::new(),
            summary_provider: None,
            history: HistoryConfig::default(),
            cache: CacheConfig::default(),
            quota: QuotaConfig::default(),
            write_log: WriteLogConfig::default(),
        }
    }
}

/// Thresholds governing truncation and summarization of turn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Private conversations longer than this get their prefix summarized.
    #[serde(default = "default_summary_trigger_private")]
    pub summary_trigger_private: usize,

    /// Turns kept verbatim after a private summarization.
    #[serde(default = "default_summary_retain_private")]
    pub summary_retain_private: usize,

    /// Group conversations are truncated to this many most recent turns.
    #[serde(default = "default_group_history_limit")]
    pub group_history_limit: usize,

    /// Hard cap on retained turns, enforced independently of summarization.
    #[serde(default = "default_max_turns_safety_limit")]
    pub max_turns_safety_limit: usize,

    /// Messages to skip before re-trying after a failed summarization.
    #[serde(default = "default_summary_failure_cooldown")]
    pub summary_failure_cooldown: u32,
}

fn default_summary_trigger_private() -> usize {
    35
}

fn default_summary_retain_private() -> usize {
    15
}

fn default_group_history_limit() -> usize {
    20
}

fn default_max_turns_safety_limit() -> usize {
    40
}

fn default_summary_failure_cooldown() -> u32 {
    5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            summary_trigger_private: default_summary_trigger_private(),
            summary_retain_private: default_summary_retain_private(),
            group_history_limit: default_group_history_limit(),
            max_turns_safety_limit: default_max_turns_safety_limit(),
            summary_failure_cooldown: default_summary_failure_cooldown(),
        }
    }
}

/// Bounds and timers for the in-memory conversation cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry count above which least-recently-used entries are evicted.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries untouched for this long are flushed and dropped, in seconds.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Interval between background flushes of all dirty entries, in seconds.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Dirty updates tolerated before a synchronous flush.
    #[serde(default = "default_save_threshold")]
    pub save_threshold: u32,

    /// Cadence of the maintenance pass, in seconds.
    #[serde(default = "default_maintenance_tick_secs")]
    pub maintenance_tick_secs: u64,
}

fn default_max_entries() -> usize {
    1000
}

fn default_idle_ttl_secs() -> u64 {
    1800
}

fn default_flush_interval_secs() -> u64 {
    10_800
}

fn default_save_threshold() -> u32 {
    3
}

fn default_maintenance_tick_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn maintenance_tick(&self) -> Duration {
        Duration::from_secs(self.maintenance_tick_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            idle_ttl_secs: default_idle_ttl_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            save_threshold: default_save_threshold(),
            maintenance_tick_secs: default_maintenance_tick_secs(),
        }
    }
}

/// Per-identity request quotas over fixed windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: u32,

    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    /// Cadence for sweeping counters of idle identities, in seconds.
    #[serde(default = "default_quota_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_hourly_limit() -> u32 {
    40
}

fn default_daily_limit() -> u32 {
    200
}

fn default_quota_sweep_secs() -> u64 {
    7200
}

impl QuotaConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
            sweep_interval_secs: default_quota_sweep_secs(),
        }
    }
}

/// Bounds for the asynchronous durable event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteLogConfig {
    /// Queued events beyond this are shed oldest-first.
    #[serde(default = "default_write_log_capacity")]
    pub capacity: usize,

    /// How often the worker reports the overflow counter, in seconds.
    #[serde(default = "default_overflow_report_secs")]
    pub overflow_report_secs: u64,
}

fn default_write_log_capacity() -> usize {
    4096
}

fn default_overflow_report_secs() -> u64 {
    60
}

impl WriteLogConfig {
    pub fn overflow_report_interval(&self) -> Duration {
        Duration::from_secs(self.overflow_report_secs)
    }
}

impl Default for WriteLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_write_log_capacity(),
            overflow_report_secs: default_overflow_report_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_prompt_length, 60);
        assert!((config.default_temperature - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.history.summary_trigger_private, 35);
        assert_eq!(config.history.summary_retain_private, 15);
        assert_eq!(config.history.group_history_limit, 20);
        assert_eq!(config.history.max_turns_safety_limit, 40);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.save_threshold, 3);
        assert_eq!(config.quota.hourly_limit, 40);
        assert_eq!(config.quota.daily_limit, 200);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_gateway_config_deserialize_empty() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.write_log.capacity, 4096);
        assert!(config.summary_provider.is_none());
    }

    #[test]
    fn test_gateway_config_deserialize_with_values() {
        let toml_str = r#"
default_system_prompt = "Be terse."
summary_provider = "deepseek"
super_admins = [123456789]

[history]
summary_trigger_private = 20
summary_retain_private = 8

[quota]
hourly_limit = 10

[[providers]]
name = "grok"
base_url = "https://api.example.com/v1"
api_key_env = "GROK_API_KEY"
model = "grok-4.1"
priority = 0

[[providers]]
name = "deepseek"
base_url = "https://api.other.com/v1"
api_key_env = "DEEPSEEK_API_KEY"
model = "deepseek-v3"
priority = 1
"#;
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_system_prompt, "Be terse.");
        assert_eq!(config.summary_provider.as_deref(), Some("deepseek"));
        assert_eq!(config.super_admins, vec![123456789]);
        assert_eq!(config.history.summary_trigger_private, 20);
        assert_eq!(config.history.summary_retain_private, 8);
        // Unspecified section fields keep their defaults.
        assert_eq!(config.history.group_history_limit, 20);
        assert_eq!(config.quota.hourly_limit, 10);
        assert_eq!(config.quota.daily_limit, 200);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].name, "deepseek");
    }

    #[test]
    fn test_duration_helpers() {
        let config = GatewayConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.slot_wait(), Duration::from_secs(15));
        assert_eq!(config.cache.idle_ttl(), Duration::from_secs(1800));
        assert_eq!(config.quota.sweep_interval(), Duration::from_secs(7200));
    }

    #[test]
    fn test_gateway_config_serde_roundtrip() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.cache.max_entries, config.cache.max_entries);
        assert_eq!(parsed.history.summary_failure_cooldown, 5);
    }
}
