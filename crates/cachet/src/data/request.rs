use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::data::header::HttpHeader;
use crate::data::policy::{CachePolicy, ErrorPolicy, RetryPolicy};
use crate::error::{Error, Result};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Delete,
    Put,
}

impl Method {
    /// Whether requests of this method send a body.
    pub fn has_body(self) -> bool { matches!(self, Method::Post | Method::Put) }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "HEAD" => Ok(Method::Head),
            "DELETE" => Ok(Method::Delete),
            "PUT" => Ok(Method::Put),
            other => Err(Error::InvalidRequest(format!("unsupported method: {other}"))),
        }
    }
}

#[derive(Clone)]
enum BodySource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

/// Request payload: a declared length, an optional content type and a way to
/// open the bytes for each attempt.
#[derive(Clone)]
pub struct RequestBody {
    content_type: Option<String>,
    length:       u64,
    source:       BodySource,
}

impl RequestBody {
    pub fn bytes(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            content_type: Some(content_type.into()),
            length:       data.len() as u64,
            source:       BodySource::Bytes(data.into()),
        }
    }

    /// Upload a file. A missing or empty file is rejected here rather than
    /// on the first attempt.
    pub fn file(content_type: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .map_err(|e| Error::InvalidRequest(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(Error::InvalidRequest(format!(
                "{} is not a non-empty file",
                path.display()
            )));
        }
        Ok(Self {
            content_type: Some(content_type.into()),
            length:       metadata.len(),
            source:       BodySource::File(path.to_path_buf()),
        })
    }

    /// URL-encoded form body.
    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self::bytes(FORM_CONTENT_TYPE, encoded)
    }

    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    pub fn len(&self) -> u64 { self.length }

    pub fn is_empty(&self) -> bool { self.length == 0 }

    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            BodySource::Bytes(data) => Ok(Box::new(Cursor::new(Arc::clone(data)))),
            BodySource::File(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BodySource::Bytes(_) => "bytes".to_string(),
            BodySource::File(path) => path.display().to_string(),
        };
        f.debug_struct("RequestBody")
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .field("source", &source)
            .finish()
    }
}

/// One HTTP call: target, headers, timeouts, policies and optional body.
#[derive(Debug, Clone)]
pub struct Request {
    method:          Method,
    url:             Url,
    header:          HttpHeader,
    read_timeout:    Duration,
    connect_timeout: Duration,
    cache_policy:    CachePolicy,
    retry_policy:    RetryPolicy,
    error_policy:    ErrorPolicy,
    body:            Option<RequestBody>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self::from_url(method, Url::parse(url)?))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            header: HttpHeader::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cache_policy: CachePolicy::default(),
            retry_policy: RetryPolicy::default(),
            error_policy: ErrorPolicy::default(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Result<Self> { Self::new(Method::Get, url) }

    pub fn post(url: &str) -> Result<Self> { Self::new(Method::Post, url) }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.put(name, value);
        self
    }

    pub fn with_headers(mut self, header: HttpHeader) -> Self {
        for (name, value) in header.iter() {
            self.header.put(name, value);
        }
        self
    }

    /// Add parameters. Body-less methods append them to the URL query;
    /// `POST` and `PUT` send them as a form body instead.
    pub fn with_query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if self.method.has_body() {
            self.body = Some(RequestBody::form(pairs));
        } else {
            self.url.query_pairs_mut().extend_pairs(pairs);
        }
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Result<Self> {
        if !self.method.has_body() {
            return Err(Error::InvalidRequest(format!(
                "{} requests do not carry a body",
                self.method
            )));
        }
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn method(&self) -> Method { self.method }

    pub fn url(&self) -> &Url { &self.url }

    pub fn header(&self) -> &HttpHeader { &self.header }

    pub fn read_timeout(&self) -> Duration { self.read_timeout }

    pub fn connect_timeout(&self) -> Duration { self.connect_timeout }

    pub fn cache_policy(&self) -> &CachePolicy { &self.cache_policy }

    pub fn retry_policy(&self) -> &RetryPolicy { &self.retry_policy }

    pub fn error_policy(&self) -> &ErrorPolicy { &self.error_policy }

    pub fn body(&self) -> Option<&RequestBody> { self.body.as_ref() }

    /// Cache key under the request's cache policy.
    pub fn cache_key(&self) -> String { self.cache_policy.cache_key(self) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_body_flags() {
        assert!(Method::Post.has_body());
        assert!(Method::Put.has_body());
        assert!(!Method::Get.has_body());
        assert!(!Method::Head.has_body());
        assert!(!Method::Delete.has_body());
        assert_eq!("delete".parse::<Method>().unwrap(), Method::Delete);
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn test_defaults() {
        let request = Request::get("http://localhost/data").unwrap();
        assert_eq!(request.read_timeout(), Duration::from_secs(10));
        assert_eq!(request.connect_timeout(), Duration::from_secs(10));
        assert!(!request.cache_policy().is_enabled());
        assert_eq!(request.retry_policy().retry_budget(), 3);
        assert!(request.body().is_none());
    }

    #[test]
    fn test_query_on_get_extends_url() {
        let request = Request::get("http://localhost/search")
            .unwrap()
            .with_query([("q", "rust lang"), ("page", "2")]);
        assert_eq!(request.url().as_str(), "http://localhost/search?q=rust+lang&page=2");
        assert!(request.body().is_none());
    }

    #[test]
    fn test_query_on_post_becomes_form() {
        let request = Request::post("http://localhost/submit")
            .unwrap()
            .with_query([("name", "a&b")]);
        assert_eq!(request.url().as_str(), "http://localhost/submit");

        let body = request.body().unwrap();
        assert_eq!(body.content_type(), Some(FORM_CONTENT_TYPE));
        let mut encoded = String::new();
        body.open().unwrap().read_to_string(&mut encoded).unwrap();
        assert_eq!(encoded, "name=a%26b");
        assert_eq!(body.len(), encoded.len() as u64);
    }

    #[test]
    fn test_body_rejected_for_get() {
        let result = Request::get("http://localhost/")
            .unwrap()
            .with_body(RequestBody::bytes("text/plain", "x"));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_empty_file_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(RequestBody::file("application/octet-stream", &empty).is_err());
        assert!(RequestBody::file("application/octet-stream", dir.path().join("missing")).is_err());

        let full = dir.path().join("full.bin");
        std::fs::write(&full, b"1234").unwrap();
        let body = RequestBody::file("application/octet-stream", &full).unwrap();
        assert_eq!(body.len(), 4);
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(Request::get("not a url"), Err(Error::Url(_))));
    }
}
