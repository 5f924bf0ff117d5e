//! HTTP fetching through a content-fingerprinted response cache.
//!
//! Every call runs the same pipeline: look the request up in the cache, and
//! on a miss perform bounded network attempts with backoff. The body is
//! streamed through a reader that hashes it, tees it into the cache writer
//! and polls a cancel predicate before every chunk. The result carries the
//! parsed value, the MD5 of the bytes parsed and whether that fingerprint
//! changed since the previous call for the same key.
//!
//! # Architecture
//!
//! - [`data`] - requests, policies, configuration and results
//! - [`core`] - pure helpers: backoff arithmetic, status classes, entry naming
//! - [`effects`] - transport, cache backends, streams and the [`Connector`]
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cachet::{CachePolicy, Connector, Request, StringParser};
//!
//! # fn main() -> cachet::Result<()> {
//! let connector = Connector::binary("/tmp/cachet")?;
//! let request = Request::get("https://example.com/")?
//!     .with_cache_policy(CachePolicy::new(Duration::from_secs(60)));
//!
//! let result = connector.fetch(&request, &StringParser)?;
//! println!("{} bytes, modified: {}", result.value().len(), result.is_modified());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;
pub mod parser;

pub use data::{
    CacheBackend, CachePolicy, CancelFlag, CancelPredicate, ConnectorConfig, Deadline, ErrorPolicy,
    FetchPhase, FetchResult, HttpHeader, Method, NetworkProfile, NeverCancel, Progress, Request,
    RequestBody, RetryPolicy, StreamMode,
};
pub use effects::{
    CacheController, CacheError, CacheWriter, Connector, ConnectorBuilder, DigestStore,
    FileCacheController, KvStore, MemoryDigestStore, SledDigestStore, StreamController, Transport,
    TransportError, TransportRequest, TransportResponse,
};
pub use error::{Error, ParseError, Result};
pub use parser::{BytesParser, FileParser, JsonParser, ParseContext, Parser, Source, StringParser};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestTransport;
