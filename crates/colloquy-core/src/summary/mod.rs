//! History compaction: the policy that decides when to truncate or
//! summarize, and the summarizer that produces long-term memory text.

pub mod policy;
pub mod summarizer;

pub use policy::{HistoryAction, HistoryPolicy};
pub use summarizer::ContextSummarizer;
