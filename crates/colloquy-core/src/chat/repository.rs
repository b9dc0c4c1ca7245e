//! Repository traits for conversation persistence.
//!
//! Implementations live in colloquy-infra (SQLite). The traits use RPITIT
//! (`impl Future` in return position) so implementors write plain async
//! fns without boxing.

use colloquy_types::conversation::{Conversation, ConversationKey, PermissionTier, UserId};
use colloquy_types::error::RepositoryError;

/// Loads and stores full conversation state (turns plus summary).
///
/// Save replaces the stored history wholesale; the cache only calls it with
/// a complete snapshot, so partial writes never happen.
pub trait ConversationRepository: Send + Sync {
    /// Load a conversation, or `None` if the key has never been saved.
    fn load(
        &self,
        key: ConversationKey,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Persist a complete conversation snapshot.
    fn save(
        &self,
        key: ConversationKey,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Per-conversation settings: system prompt, provider preference, and
/// sampling temperature. `None` on a setter clears the override.
pub trait SettingsRepository: Send + Sync {
    fn system_prompt(
        &self,
        key: ConversationKey,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    fn set_system_prompt(
        &self,
        key: ConversationKey,
        prompt: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn provider_preference(
        &self,
        key: ConversationKey,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    fn set_provider_preference(
        &self,
        key: ConversationKey,
        provider: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn temperature(
        &self,
        key: ConversationKey,
    ) -> impl std::future::Future<Output = Result<Option<f64>, RepositoryError>> + Send;

    fn set_temperature(
        &self,
        key: ConversationKey,
        temperature: Option<f64>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Resolves an identity to its permission tier.
///
/// `None` means the identity is unknown and must be refused before any
/// state is touched.
pub trait AccessControl: Send + Sync {
    fn permission_tier(
        &self,
        user: UserId,
    ) -> impl std::future::Future<Output = Result<Option<PermissionTier>, RepositoryError>> + Send;
}
