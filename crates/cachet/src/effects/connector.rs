use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::data::config::{CacheBackend, ConnectorConfig, StreamMode};
use crate::data::progress::{CancelPredicate, NeverCancel};
use crate::data::request::Request;
use crate::data::result::FetchResult;
use crate::effects::cache::{CacheController, FileCacheController, KvStore};
use crate::effects::digest_store::{DigestStore, SledDigestStore};
use crate::effects::pipeline::ResultPipeline;
use crate::effects::stream::{
    BufferedStreamController, ByteArrayStreamController, RawStreamController, StreamController,
};
use crate::effects::transport::Transport;
use crate::error::{Error, Result};
use crate::parser::Parser;

/// Directory under a binary cache root that holds the digest database.
pub const DIGEST_DB_DIR: &str = "digests";

/// Entry point for fetching: a transport plus the optional cache, stream
/// adapter and digest memory every call goes through.
///
/// Cloning is cheap; clones share all parts.
#[derive(Clone)]
pub struct Connector {
    transport: Arc<dyn Transport>,
    cache:     Option<Arc<dyn CacheController>>,
    stream:    Arc<dyn StreamController>,
    digests:   Option<Arc<dyn DigestStore>>,
}

impl Connector {
    pub fn builder(transport: impl Transport + 'static) -> ConnectorBuilder {
        ConnectorBuilder::new(Arc::new(transport))
    }

    /// Plain connector: no cache, no digest memory.
    #[cfg(feature = "reqwest")]
    pub fn new() -> Self { Self::builder(crate::effects::transport::ReqwestTransport::new()).build() }

    /// File cache under `cache_dir` with a raw stream, for binary payloads.
    /// Digests are remembered in [`DIGEST_DB_DIR`] under the same root.
    #[cfg(feature = "reqwest")]
    pub fn binary(cache_dir: impl AsRef<Path>) -> Result<Self> {
        Self::binary_with(cache_dir, crate::effects::transport::ReqwestTransport::new())
    }

    pub fn binary_with(cache_dir: impl AsRef<Path>, transport: impl Transport + 'static) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        Ok(Self::builder(transport)
            .cache_controller(FileCacheController::new(cache_dir)?)
            .digest_store(SledDigestStore::open(cache_dir.join(DIGEST_DB_DIR))?)
            .build())
    }

    /// Key-value cache and digest memory in `store`, bodies read into memory
    /// before parsing, for API responses.
    #[cfg(feature = "reqwest")]
    pub fn restful(store: &KvStore) -> Result<Self> {
        Self::restful_with(store, crate::effects::transport::ReqwestTransport::new())
    }

    pub fn restful_with(store: &KvStore, transport: impl Transport + 'static) -> Result<Self> {
        Ok(Self::builder(transport)
            .cache_controller(store.cache_controller()?)
            .stream_controller(ByteArrayStreamController)
            .digest_store(store.digest_store()?)
            .build())
    }

    #[cfg(feature = "reqwest")]
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        Self::from_config_with(config, crate::effects::transport::ReqwestTransport::new())
    }

    pub fn from_config_with(config: &ConnectorConfig, transport: impl Transport + 'static) -> Result<Self> {
        let mut builder = Self::builder(transport);
        let mut kv = None;

        match config.cache.backend {
            CacheBackend::None => {}
            CacheBackend::File => {
                let directory = backend_directory(config, "file")?;
                builder = builder.cache_controller(
                    FileCacheController::new(directory)?.with_extension(config.cache.extension.as_str()),
                );
            }
            CacheBackend::Kv => {
                let directory = backend_directory(config, "kv")?;
                let store = KvStore::open(directory)?;
                builder = builder.cache_controller(store.cache_controller()?);
                kv = Some((directory, store));
            }
        }

        match (&config.digest.store, &kv) {
            (Some(path), Some((directory, store))) if path.as_path() == *directory => {
                builder = builder.digest_store(store.digest_store()?);
            }
            (Some(path), _) => builder = builder.digest_store(SledDigestStore::open(path)?),
            (None, Some((_, store))) => builder = builder.digest_store(store.digest_store()?),
            (None, None) => {}
        }

        builder = match config.stream.mode {
            StreamMode::Raw => builder.stream_controller(RawStreamController),
            StreamMode::Buffered => {
                builder.stream_controller(BufferedStreamController::new(config.stream.buffer_bytes))
            }
            StreamMode::Memory => builder.stream_controller(ByteArrayStreamController),
        };

        debug!(backend = ?config.cache.backend, stream = ?config.stream.mode, "connector configured");
        Ok(builder.build())
    }

    /// Run one call: cache lookup, then network attempts until success,
    /// a fatal failure, cancellation or an exhausted retry budget.
    pub fn connect<T, P>(
        &self,
        request: &Request,
        parser: &P,
        cancel: &dyn CancelPredicate,
    ) -> Result<FetchResult<T>>
    where
        P: Parser<T> + ?Sized,
    {
        ResultPipeline::new(self, request, parser, cancel).run()
    }

    /// [`connect`](Self::connect) without cancellation.
    pub fn fetch<T, P>(&self, request: &Request, parser: &P) -> Result<FetchResult<T>>
    where
        P: Parser<T> + ?Sized,
    {
        self.connect(request, parser, &NeverCancel)
    }

    pub fn has_cache(&self) -> bool { self.cache.is_some() }

    pub(crate) fn transport(&self) -> &dyn Transport { self.transport.as_ref() }

    pub(crate) fn cache_controller(&self) -> Option<&dyn CacheController> { self.cache.as_deref() }

    pub(crate) fn stream_controller(&self) -> &dyn StreamController { self.stream.as_ref() }

    pub(crate) fn digest_store(&self) -> Option<&dyn DigestStore> { self.digests.as_deref() }
}

#[cfg(feature = "reqwest")]
impl Default for Connector {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("cache", &self.cache.is_some())
            .field("digests", &self.digests.is_some())
            .finish_non_exhaustive()
    }
}

fn backend_directory<'c>(config: &'c ConnectorConfig, backend: &str) -> Result<&'c Path> {
    config.cache.directory.as_deref().ok_or_else(|| {
        Error::InvalidConfig(format!("cache backend `{backend}` needs a directory"))
    })
}

pub struct ConnectorBuilder {
    transport: Arc<dyn Transport>,
    cache:     Option<Arc<dyn CacheController>>,
    stream:    Arc<dyn StreamController>,
    digests:   Option<Arc<dyn DigestStore>>,
}

impl ConnectorBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: None,
            stream: Arc::new(RawStreamController),
            digests: None,
        }
    }

    pub fn cache_controller(mut self, cache: impl CacheController + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn stream_controller(mut self, stream: impl StreamController + 'static) -> Self {
        self.stream = Arc::new(stream);
        self
    }

    pub fn digest_store(mut self, digests: impl DigestStore + 'static) -> Self {
        self.digests = Some(Arc::new(digests));
        self
    }

    pub fn build(self) -> Connector {
        Connector {
            transport: self.transport,
            cache:     self.cache,
            stream:    self.stream,
            digests:   self.digests,
        }
    }
}
