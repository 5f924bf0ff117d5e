//! Effects layer: everything that touches the network, the disk or the
//! clock.

pub mod cache;
pub mod connector;
pub mod digest_store;
pub mod parse_stream;
pub(crate) mod pipeline;
pub mod stream;
pub mod transport;

pub use cache::{
    CacheController, CacheError, CacheReader, CacheWriter, FileCacheController, FileCacheWriter,
    KvCacheController, KvCacheWriter, KvStore,
};
pub use connector::{Connector, ConnectorBuilder};
pub use digest_store::{DigestStore, MemoryDigestStore, SledDigestStore};
pub use parse_stream::{Canceled, MAX_READ_BYTES};
pub use stream::{BufferedStreamController, ByteArrayStreamController, RawStreamController, StreamController};
pub use transport::{
    ExactLength, OutgoingBody, Transport, TransportError, TransportRequest, TransportResponse,
};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
