//! Asynchronous durable audit logging.

pub mod writelog;

pub use writelog::{AsyncWriteLog, EventSink};
