//! SQLite persistence for Colloquy.
//!
//! One [`DatabasePool`] with split reader/writer connections backs every
//! repository here. Domain types are mapped through private row structs
//! rather than `FromRow` derives so the SQL stays visible.

pub mod access;
pub mod conversation;
pub mod events;
pub mod pool;
pub mod settings;

pub use access::SqliteAccessControl;
pub use conversation::SqliteConversationRepository;
pub use events::{SqliteEventSink, StoredEvent};
pub use pool::DatabasePool;
pub use settings::SqliteSettingsRepository;
