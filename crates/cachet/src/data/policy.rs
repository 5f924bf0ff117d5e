use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core;
use crate::data::request::Request;
use crate::error::{Error, Result};

/// Entries that would live shorter than this are never written or read.
pub const MIN_CACHEABLE_TTL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ITEM_BYTES: u64 = 8 * 1024 * 1024;

pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_BACKOFF: f64 = 1.25;
pub const DEFAULT_TIMEOUT_BACKOFF: f64 = 2.0;
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_millis(1000);

pub const DEFAULT_MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

pub type CacheKeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;
pub type StatusPredicate = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// How long responses stay reusable, how large they may be, and which parts
/// of a request identify them.
#[derive(Clone)]
pub struct CachePolicy {
    ttl:            Duration,
    max_item_bytes: u64,
    key_headers:    Vec<String>,
    key_fn:         Option<CacheKeyFn>,
}

impl Default for CachePolicy {
    fn default() -> Self { Self::disabled() }
}

impl CachePolicy {
    pub fn disabled() -> Self { Self::new(Duration::ZERO) }

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            key_headers: Vec::new(),
            key_fn: None,
        }
    }

    pub fn with_max_item_bytes(mut self, max_item_bytes: u64) -> Self {
        self.max_item_bytes = max_item_bytes;
        self
    }

    /// Include the value of a request header in the cache key.
    pub fn with_key_header(mut self, name: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        if !self.key_headers.contains(&name) {
            self.key_headers.push(name);
            self.key_headers.sort();
        }
        self
    }

    /// Replace the default key derivation entirely.
    pub fn with_key_fn(mut self, key_fn: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn max_item_bytes(&self) -> u64 { self.max_item_bytes }

    pub fn is_enabled(&self) -> bool { self.ttl >= MIN_CACHEABLE_TTL }

    /// `METHOD url` followed by one `name: value` line per selected header
    /// present on the request, in name order.
    pub fn cache_key(&self, request: &Request) -> String {
        if let Some(key_fn) = &self.key_fn {
            return key_fn(request);
        }

        let mut key = format!("{} {}", request.method(), request.url());
        for name in &self.key_headers {
            if let Some(value) = request.header().get(name) {
                key.push('\n');
                key.push_str(name);
                key.push_str(": ");
                key.push_str(value);
            }
        }
        key
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("max_item_bytes", &self.max_item_bytes)
            .field("key_headers", &self.key_headers)
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}

/// Bounded retry with multiplicative backoff.
///
/// Multipliers and the base wait are validated by the setters, so a policy
/// that exists is always usable.
#[derive(Clone)]
pub struct RetryPolicy {
    retry_budget:    u32,
    backoff:         f64,
    timeout_backoff: f64,
    base_wait:       Duration,
    fatal_status:    Option<StatusPredicate>,
    retryable:       Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::new(DEFAULT_RETRY_BUDGET) }
}

impl RetryPolicy {
    /// `retry_budget` extra attempts after the first one.
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget,
            backoff: DEFAULT_BACKOFF,
            timeout_backoff: DEFAULT_TIMEOUT_BACKOFF,
            base_wait: DEFAULT_BASE_WAIT,
            fatal_status: None,
            retryable: None,
        }
    }

    pub fn no_retry() -> Self { Self::new(0) }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64) -> Result<Self> {
        self.backoff = validate_multiplier("backoff", multiplier)?;
        Ok(self)
    }

    pub fn with_timeout_backoff(mut self, multiplier: f64) -> Result<Self> {
        self.timeout_backoff = validate_multiplier("timeout backoff", multiplier)?;
        Ok(self)
    }

    pub fn with_base_wait(mut self, base_wait: Duration) -> Result<Self> {
        if base_wait.is_zero() {
            return Err(Error::InvalidPolicy("base wait must be positive".into()));
        }
        self.base_wait = base_wait;
        Ok(self)
    }

    /// Statuses answered with [`Error::AccessFailed`]. Defaults to all 4xx.
    pub fn with_fatal_status(mut self, fatal: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.fatal_status = Some(Arc::new(fatal));
        self
    }

    /// Narrow which non-fatal failures are retried.
    pub fn with_retryable(mut self, retryable: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Some(Arc::new(retryable));
        self
    }

    pub fn retry_budget(&self) -> u32 { self.retry_budget }

    pub fn max_attempts(&self) -> u32 { self.retry_budget.saturating_add(1) }

    pub fn backoff(&self) -> f64 { self.backoff }

    pub fn timeout_backoff(&self) -> f64 { self.timeout_backoff }

    pub fn base_wait(&self) -> Duration { self.base_wait }

    pub fn base_wait_ms(&self) -> u64 { self.base_wait.as_millis() as u64 }

    /// Wait before the attempt after `attempt`, given the wait used so far.
    pub fn next_backoff_ms(&self, attempt: u32, current_ms: u64) -> u64 {
        core::next_backoff_ms(self.backoff, attempt, current_ms)
    }

    pub fn is_fatal_status(&self, status: u16) -> bool {
        match &self.fatal_status {
            Some(fatal) => fatal(status),
            None => core::is_client_error(status),
        }
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        if error.is_fatal() {
            return false;
        }
        self.retryable.as_ref().is_none_or(|retryable| retryable(error))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_budget", &self.retry_budget)
            .field("backoff", &self.backoff)
            .field("timeout_backoff", &self.timeout_backoff)
            .field("base_wait", &self.base_wait)
            .finish_non_exhaustive()
    }
}

fn validate_multiplier(name: &str, multiplier: f64) -> Result<f64> {
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(multiplier)
    } else {
        Err(Error::InvalidPolicy(format!(
            "{name} multiplier must be at least 1.0, got {multiplier}"
        )))
    }
}

/// What to do with the body of a non-2xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    capture_error_body:   bool,
    max_error_body_bytes: usize,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            capture_error_body:   false,
            max_error_body_bytes: DEFAULT_MAX_ERROR_BODY_BYTES,
        }
    }
}

impl ErrorPolicy {
    pub fn new() -> Self { Self::default() }

    pub fn capture_error_body(mut self, capture: bool) -> Self {
        self.capture_error_body = capture;
        self
    }

    pub fn max_error_body_bytes(mut self, max: usize) -> Self {
        self.max_error_body_bytes = max;
        self
    }

    pub fn captures_error_body(&self) -> bool { self.capture_error_body }

    pub fn error_body_limit(&self) -> usize { self.max_error_body_bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::request::Method;

    #[test]
    fn test_ttl_threshold() {
        assert!(!CachePolicy::disabled().is_enabled());
        assert!(!CachePolicy::new(Duration::from_millis(999)).is_enabled());
        assert!(CachePolicy::new(Duration::from_millis(1000)).is_enabled());
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let policy = CachePolicy::new(Duration::from_secs(60))
            .with_key_header("Accept")
            .with_key_header("accept-language");
        let request = Request::get("http://localhost/a?x=1")
            .unwrap()
            .with_header("Accept-Language", "ja")
            .with_header("Accept", "application/json")
            .with_header("User-Agent", "ignored");

        let key = policy.cache_key(&request);
        assert_eq!(
            key,
            "GET http://localhost/a?x=1\naccept: application/json\naccept-language: ja"
        );
        assert_eq!(key, policy.cache_key(&request.clone()));
    }

    #[test]
    fn test_cache_key_distinguishes_method() {
        let policy = CachePolicy::new(Duration::from_secs(60));
        let get = Request::new(Method::Get, "http://localhost/").unwrap();
        let head = Request::new(Method::Head, "http://localhost/").unwrap();
        assert_ne!(policy.cache_key(&get), policy.cache_key(&head));
    }

    #[test]
    fn test_custom_key_fn() {
        let policy = CachePolicy::new(Duration::from_secs(60)).with_key_fn(|r| r.url().path().to_string());
        let request = Request::get("http://localhost/items/7?cachebust=1").unwrap();
        assert_eq!(policy.cache_key(&request), "/items/7");
    }

    #[test]
    fn test_retry_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_budget(), 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff(), 1.25);
        assert_eq!(policy.timeout_backoff(), 2.0);
        assert_eq!(policy.base_wait_ms(), 1000);
        assert_eq!(policy.next_backoff_ms(2, 1000), 1562);
    }

    #[test]
    fn test_retry_validation() {
        assert!(matches!(RetryPolicy::default().with_backoff(0.5), Err(Error::InvalidPolicy(_))));
        assert!(RetryPolicy::default().with_backoff(f64::NAN).is_err());
        assert!(RetryPolicy::default().with_timeout_backoff(0.0).is_err());
        assert!(RetryPolicy::default().with_base_wait(Duration::ZERO).is_err());
        assert!(RetryPolicy::default().with_backoff(1.0).is_ok());
    }

    #[test]
    fn test_fatal_status_defaults_to_client_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.is_fatal_status(404));
        assert!(policy.is_fatal_status(400));
        assert!(!policy.is_fatal_status(500));
        assert!(!policy.is_fatal_status(304));

        let policy = policy.with_fatal_status(|status| status == 404);
        assert!(!policy.is_fatal_status(429));
    }

    #[test]
    fn test_retryable_predicate() {
        let policy = RetryPolicy::default().with_retryable(|e| e.status() != Some(501));
        let not_implemented = Error::Server {
            status: 501,
            url:    "http://localhost/".into(),
            body:   None,
        };
        let unavailable = Error::Server {
            status: 503,
            url:    "http://localhost/".into(),
            body:   None,
        };
        assert!(!policy.is_retryable(&not_implemented));
        assert!(policy.is_retryable(&unavailable));
        assert!(!policy.is_retryable(&Error::Interrupted));
    }
}
