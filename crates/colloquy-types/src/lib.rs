//! Shared domain types for Colloquy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, and
//! thiserror. Everything here is plain data: the conversation model, LLM
//! request/response shapes, gateway configuration, audit events, and the
//! error taxonomy shared across crates.

pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
