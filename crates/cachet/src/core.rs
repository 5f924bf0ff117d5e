//! Core layer: pure functions with no I/O.

mod cache;
mod retry;

pub use cache::{digest_key, entry_file_name, is_expired};
pub use retry::{StatusClass, classify_status, is_client_error, next_backoff_ms, scale_timeout};
