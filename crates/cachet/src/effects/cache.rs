//! Response cache: a controller decides where entries live, a writer stages
//! exactly one entry and either commits or aborts it.

mod file;
mod kv;

use std::io::{self, Read};

pub use file::{FileCacheController, FileCacheWriter};
pub use kv::{KvCacheController, KvCacheWriter, KvStore};

use crate::data::header::HttpHeader;
use crate::data::policy::CachePolicy;
use crate::data::request::Request;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("entry too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error(transparent)]
    Fs(#[from] cachet_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("entry codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

pub type CacheReader = Box<dyn Read + Send>;

pub trait CacheController: Send + Sync {
    /// Open a fresh entry for `request`, or `None` on a miss.
    ///
    /// Expired entries are removed here and reported as misses.
    fn open_cache(&self, request: &Request) -> Result<Option<CacheReader>, CacheError>;

    /// Start staging a response, or `None` when it must not be cached.
    fn new_cache_writer(
        &self,
        request: &Request,
        header: &HttpHeader,
    ) -> Result<Option<Box<dyn CacheWriter>>, CacheError>;
}

/// Staged cache entry. Both finalizers consume the writer; dropping it
/// without either discards the staged bytes.
pub trait CacheWriter: Send {
    fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError>;

    /// Publish the staged entry. Fails with [`CacheError::TooLarge`] when more
    /// bytes than the item limit were offered; nothing is published then.
    fn commit(self: Box<Self>) -> Result<(), CacheError>;

    fn abort(self: Box<Self>) -> Result<(), CacheError>;
}

/// Whether a response may be staged at all under `policy`.
pub(crate) fn accepts_response(policy: &CachePolicy, header: &HttpHeader) -> bool {
    policy.is_enabled()
        && header
            .content_length()
            .is_none_or(|length| length <= policy.max_item_bytes())
}

/// Counts offered bytes against the item limit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SizeLimit {
    limit: u64,
    seen:  u64,
}

impl SizeLimit {
    pub(crate) fn new(limit: u64) -> Self { Self { limit, seen: 0 } }

    /// Record `len` more bytes; false once the limit has been passed.
    pub(crate) fn admit(&mut self, len: usize) -> bool {
        self.seen = self.seen.saturating_add(len as u64);
        self.seen <= self.limit
    }

    pub(crate) fn check(&self) -> Result<(), CacheError> {
        if self.seen > self.limit {
            Err(CacheError::TooLarge {
                size:  self.seen,
                limit: self.limit,
            })
        } else {
            Ok(())
        }
    }
}
