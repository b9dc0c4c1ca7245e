//! Core conversation pipeline for Colloquy.
//!
//! This crate owns the gateway's behavior and stays free of infrastructure:
//! per-conversation sequencing, the write-back context cache, provider
//! failover routing, history summarization, fixed-window quotas, and the
//! asynchronous audit write log. Persistence and provider transports live
//! behind traits implemented in colloquy-infra.

pub mod audit;
pub mod chat;
pub mod llm;
pub mod quota;
pub mod summary;
