//! Conversation state management: sequencing, caching, and the message
//! pipeline that ties the other subsystems together.

pub mod cache;
pub mod repository;
pub mod sequencer;
pub mod service;

pub use cache::ContextCache;
pub use sequencer::ChatSequencer;
pub use service::ChatService;
