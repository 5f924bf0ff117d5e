use crate::data::header::HttpHeader;
use crate::data::profile::NetworkProfile;

/// Parsed value plus where it came from.
///
/// Exactly one of the two digests is set: the cache digest when the value
/// was read from cache, the content digest when it came off the network.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    value:           T,
    cache_digest:    Option<String>,
    content_digest:  Option<String>,
    response_header: Option<HttpHeader>,
    modified:        bool,
    profile:         NetworkProfile,
}

impl<T> FetchResult<T> {
    pub(crate) fn from_cache(value: T, cache_digest: String) -> Self {
        Self {
            value,
            cache_digest: Some(cache_digest),
            content_digest: None,
            response_header: None,
            modified: false,
            profile: NetworkProfile::new(),
        }
    }

    pub(crate) fn from_network(
        value: T,
        content_digest: String,
        response_header: HttpHeader,
        profile: NetworkProfile,
        modified: bool,
    ) -> Self {
        Self {
            value,
            cache_digest: None,
            content_digest: Some(content_digest),
            response_header: Some(response_header),
            modified,
            profile,
        }
    }

    pub fn value(&self) -> &T { &self.value }

    pub fn into_value(self) -> T { self.value }

    pub fn cache_digest(&self) -> Option<&str> { self.cache_digest.as_deref() }

    pub fn content_digest(&self) -> Option<&str> { self.content_digest.as_deref() }

    /// Whichever digest is set.
    pub fn digest(&self) -> Option<&str> { self.cache_digest().or(self.content_digest()) }

    pub fn response_header(&self) -> Option<&HttpHeader> { self.response_header.as_ref() }

    /// True when the fetched content differs from the last recorded
    /// fingerprint for the same key, or nothing was recorded. Always false
    /// for cache hits.
    pub fn is_modified(&self) -> bool { self.modified }

    pub fn has_cache(&self) -> bool { self.cache_digest.is_some() }

    /// True whenever a value was produced, from the network or the cache.
    pub fn has_content(&self) -> bool { self.content_digest.is_some() || self.cache_digest.is_some() }

    pub fn profile(&self) -> &NetworkProfile { &self.profile }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        FetchResult {
            value:           f(self.value),
            cache_digest:    self.cache_digest,
            content_digest:  self.content_digest,
            response_header: self.response_header,
            modified:        self.modified,
            profile:         self.profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_result_shape() {
        let result = FetchResult::from_cache(7, "abc".to_string());
        assert!(result.has_cache());
        assert!(result.has_content());
        assert!(result.content_digest().is_none());
        assert!(!result.is_modified());
        assert!(result.response_header().is_none());
        assert_eq!(result.digest(), Some("abc"));
    }

    #[test]
    fn test_network_result_shape() {
        let result = FetchResult::from_network(
            "body",
            "def".to_string(),
            HttpHeader::new(),
            NetworkProfile::new(),
            true,
        )
        .map(str::len);
        assert!(!result.has_cache());
        assert!(result.has_content());
        assert!(result.is_modified());
        assert_eq!(*result.value(), 4);
        assert_eq!(result.content_digest(), Some("def"));
    }
}
