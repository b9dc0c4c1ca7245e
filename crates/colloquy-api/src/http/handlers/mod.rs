//! REST API request handlers.

pub mod admin;
pub mod conversation;
pub mod message;

use colloquy_types::conversation::ConversationKey;

use crate::http::error::AppError;

/// Parse a conversation key path segment like `private:42` or `group:-17`.
pub(crate) fn parse_key(raw: &str) -> Result<ConversationKey, AppError> {
    raw.parse().map_err(AppError::Validation)
}
