use std::io::{self, Read};
use std::time::Duration;

use url::Url;

use crate::data::request::Method;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout(_) => true,
            TransportError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

pub struct OutgoingBody {
    pub content_type: Option<String>,
    pub length:       u64,
    pub reader:       Box<dyn Read + Send>,
}

/// Everything a transport needs for one attempt.
pub struct TransportRequest {
    pub method:          Method,
    pub url:             Url,
    pub headers:         Vec<(String, String)>,
    pub body:            Option<OutgoingBody>,
    pub connect_timeout: Duration,
    pub read_timeout:    Duration,
}

pub struct TransportResponse {
    pub status:  u16,
    pub headers: Vec<(String, String)>,
    pub body:    Box<dyn Read + Send>,
}

/// Blocking HTTP transport.
///
/// Implementations follow redirects on their own and report the final
/// status; status classification and retry happen in the pipeline.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Delivers exactly `length` bytes, failing if the source ends early.
pub struct ExactLength<R> {
    inner:     R,
    remaining: u64,
}

impl<R> ExactLength<R> {
    pub fn new(inner: R, length: u64) -> Self {
        Self {
            inner,
            remaining: length,
        }
    }
}

impl<R: Read> Read for ExactLength<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("request body ended {} bytes short of its declared length", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::sync::Mutex;
    use std::time::Duration;

    use reqwest::blocking::{Body, Client};
    use reqwest::redirect::Policy;

    use super::*;

    const MAX_REDIRECTS: usize = 10;

    /// Production transport on `reqwest`'s blocking client.
    ///
    /// The client is rebuilt only when the connect timeout changes between
    /// attempts; the read timeout is applied per request.
    pub struct ReqwestTransport {
        user_agent: String,
        client:     Mutex<Option<(Duration, Client)>>,
    }

    impl Default for ReqwestTransport {
        fn default() -> Self { Self::new() }
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self {
                user_agent: concat!("cachet/", env!("CARGO_PKG_VERSION")).to_string(),
                client:     Mutex::new(None),
            }
        }

        pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
            self.user_agent = user_agent.into();
            self
        }

        fn client(&self, connect_timeout: Duration) -> Result<Client, TransportError> {
            let mut cached = self
                .client
                .lock()
                .map_err(|_| TransportError::Other("client cache poisoned".into()))?;
            if let Some((timeout, client)) = cached.as_ref() {
                if *timeout == connect_timeout {
                    return Ok(client.clone());
                }
            }

            let client = Client::builder()
                .connect_timeout(connect_timeout)
                .user_agent(self.user_agent.as_str())
                .redirect(Policy::limited(MAX_REDIRECTS))
                .build()
                .map_err(map_error)?;
            *cached = Some((connect_timeout, client.clone()));
            Ok(client)
        }
    }

    impl Transport for ReqwestTransport {
        fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            let client = self.client(request.connect_timeout)?;
            let mut builder = client
                .request(to_reqwest_method(request.method), request.url)
                .timeout(request.read_timeout);

            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            if let Some(body) = request.body {
                if let Some(content_type) = body.content_type {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                builder = builder.body(Body::sized(body.reader, body.length));
            }

            let response = builder.send().map_err(map_error)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();

            Ok(TransportResponse {
                status,
                headers,
                body: Box::new(response),
            })
        }
    }

    fn to_reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
            Method::Delete => reqwest::Method::DELETE,
            Method::Put => reqwest::Method::PUT,
        }
    }

    fn map_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_method_mapping() {
            assert_eq!(to_reqwest_method(Method::Get), reqwest::Method::GET);
            assert_eq!(to_reqwest_method(Method::Put), reqwest::Method::PUT);
        }

        #[test]
        fn test_client_reused_for_same_timeout() {
            let transport = ReqwestTransport::new();
            transport.client(Duration::from_secs(1)).unwrap();
            transport.client(Duration::from_secs(1)).unwrap();
            let cached = transport.client.lock().unwrap();
            assert_eq!(cached.as_ref().map(|(t, _)| *t), Some(Duration::from_secs(1)));
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
