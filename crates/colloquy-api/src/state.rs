//! Application state wiring all services together.
//!
//! The chat service is generic over repository and access-control traits;
//! AppState pins it to the concrete SQLite implementations and holds the
//! shared handles used by both CLI commands and REST API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use colloquy_core::audit::writelog::AsyncWriteLog;
use colloquy_core::chat::cache::ContextCache;
use colloquy_core::chat::sequencer::ChatSequencer;
use colloquy_core::chat::service::ChatService;
use colloquy_core::llm::router::ProviderRouter;
use colloquy_core::quota::limiter::RateLimiter;
use colloquy_infra::config::{data_dir, database_url, load_gateway_config};
use colloquy_infra::llm::router_from_config;
use colloquy_infra::sqlite::{
    DatabasePool, SqliteAccessControl, SqliteConversationRepository, SqliteEventSink,
    SqliteSettingsRepository,
};
use colloquy_types::config::GatewayConfig;

/// The chat service generics pinned to the SQLite implementations.
pub type ConcreteChatService =
    ChatService<SqliteConversationRepository, SqliteSettingsRepository, SqliteAccessControl>;

/// Shared application state for CLI commands and API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub chat_service: Arc<ConcreteChatService>,
    pub provider_router: Arc<ProviderRouter>,
    pub write_log: Arc<AsyncWriteLog>,
    pub events: SqliteEventSink,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: load config, connect to the
    /// database, build the provider chain, wire the chat service.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = Arc::new(load_gateway_config(&data_dir).await);
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let provider_router = Arc::new(router_from_config(&config));

        let events = SqliteEventSink::new(db_pool.clone());
        let write_log = Arc::new(AsyncWriteLog::spawn(
            events.clone(),
            config.write_log.clone(),
        ));

        let cache = Arc::new(ContextCache::new(
            SqliteConversationRepository::new(db_pool.clone()),
            config.cache.clone(),
        ));

        let chat_service = Arc::new(ChatService::new(
            config.clone(),
            Arc::new(ChatSequencer::new()),
            cache,
            provider_router.clone(),
            Arc::new(RateLimiter::new(config.quota.clone())),
            write_log.clone(),
            SqliteSettingsRepository::new(db_pool.clone()),
            SqliteAccessControl::new(db_pool.clone(), config.super_admins.clone()),
        ));

        Ok(Self {
            config,
            chat_service,
            provider_router,
            write_log,
            events,
            data_dir,
            db_pool,
        })
    }
}
