//! Data layer: requests, policies and the values a call produces.

pub mod config;
pub mod header;
pub mod policy;
pub mod profile;
pub mod progress;
pub mod request;
pub mod result;

pub use config::{CacheBackend, ConnectorConfig, StreamMode};
pub use header::HttpHeader;
pub use policy::{CachePolicy, ErrorPolicy, RetryPolicy};
pub use profile::NetworkProfile;
pub use progress::{CancelFlag, CancelPredicate, Deadline, FetchPhase, NeverCancel, Progress};
pub use request::{Method, Request, RequestBody};
pub use result::FetchResult;
