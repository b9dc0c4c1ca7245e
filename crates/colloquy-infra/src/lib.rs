//! Infrastructure layer for Colloquy.
//!
//! Contains implementations of the seams defined in `colloquy-core`:
//! SQLite storage behind the repository traits, the durable event sink,
//! the OpenAI-compatible LLM provider, and configuration loading.

pub mod config;
pub mod llm;
pub mod sqlite;
