//! LLM provider implementations.
//!
//! Every configured provider speaks the OpenAI chat completions protocol,
//! so one [`OpenAiCompatibleProvider`] covers them all via per-entry base
//! URLs. This module also wires a full [`ProviderRouter`] from gateway
//! configuration, resolving API keys from the environment.

pub mod openai_compat;

use secrecy::SecretString;
use tracing::warn;

use colloquy_core::llm::box_provider::BoxLlmProvider;
use colloquy_core::llm::router::{ProviderRouter, RouterEntry};
use colloquy_types::config::GatewayConfig;
use colloquy_types::llm::ProviderConfig;

use self::openai_compat::OpenAiCompatibleProvider;

/// Resolve a provider's API key from the environment variable it names.
pub fn resolve_api_key(config: &ProviderConfig) -> Option<SecretString> {
    match std::env::var(&config.api_key_env) {
        Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
        _ => None,
    }
}

/// Build a [`BoxLlmProvider`] from a provider entry and its resolved key.
pub fn create_provider(config: &ProviderConfig, api_key: SecretString) -> BoxLlmProvider {
    BoxLlmProvider::new(OpenAiCompatibleProvider::new(config, api_key))
}

/// Build the failover router from gateway configuration.
///
/// Entries whose API key environment variable is unset are skipped with a
/// warning rather than failing startup; the router may come up empty.
pub fn router_from_config(config: &GatewayConfig) -> ProviderRouter {
    let mut entries = Vec::with_capacity(config.providers.len());
    for provider_config in &config.providers {
        let Some(api_key) = resolve_api_key(provider_config) else {
            warn!(
                provider = %provider_config.name,
                env = %provider_config.api_key_env,
                "API key not set, provider skipped"
            );
            continue;
        };
        entries.push(RouterEntry {
            provider: create_provider(provider_config, api_key),
            priority: provider_config.priority,
            enabled: provider_config.enabled,
        });
    }

    ProviderRouter::new(
        entries,
        config.request_timeout(),
        config.summary_provider.as_deref(),
    )
}
