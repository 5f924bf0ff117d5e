use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::data::request::Request;

/// Where a call currently is, as seen by a [`CancelPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Opening or parsing a cached entry.
    CacheLookup,
    /// Sending the request and waiting for the status line.
    Connecting,
    /// Streaming the response body.
    Receiving,
    /// Sleeping between attempts.
    Backoff,
}

/// Snapshot handed to the cancel predicate at every checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub request:    &'a Request,
    pub phase:      FetchPhase,
    /// 1-based network attempt; 0 while reading the cache.
    pub attempt:    u32,
    /// Bytes delivered to the parser in this phase so far.
    pub bytes_read: u64,
}

/// Polled cooperatively; returning `true` aborts the call with
/// [`Error::Interrupted`](crate::Error::Interrupted).
pub trait CancelPredicate {
    fn is_canceled(&self, progress: &Progress<'_>) -> bool;
}

impl<F> CancelPredicate for F
where
    F: Fn(&Progress<'_>) -> bool,
{
    fn is_canceled(&self, progress: &Progress<'_>) -> bool { self(progress) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelPredicate for NeverCancel {
    fn is_canceled(&self, _: &Progress<'_>) -> bool { false }
}

/// Shared token another thread can trip.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    pub fn is_set(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

impl CancelPredicate for CancelFlag {
    fn is_canceled(&self, _: &Progress<'_>) -> bool { self.is_set() }
}

/// Cancels once the instant has passed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(pub Instant);

impl CancelPredicate for Deadline {
    fn is_canceled(&self, _: &Progress<'_>) -> bool { Instant::now() >= self.0 }
}
