use std::collections::{BTreeMap, BTreeSet};

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const COOKIE: &str = "Cookie";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const ETAG: &str = "ETag";
pub const RANGE: &str = "Range";

/// Header map with case-insensitive names.
///
/// Every name keeps a single value except `Cookie` and `Set-Cookie`, whose
/// values are collected as a set. Iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeader {
    values:  BTreeMap<String, (String, String)>,
    cookies: BTreeSet<String>,
}

impl HttpHeader {
    pub fn new() -> Self { Self::default() }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if is_cookie(&name) {
            self.cookies.insert(value);
        } else {
            self.values.insert(name.to_ascii_lowercase(), (name, value));
        }
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(name, value);
        self
    }

    /// Single-valued lookup. Cookie names are answered by [`cookies`](Self::cookies).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        if is_cookie(name) {
            if self.cookies.is_empty() {
                return None;
            }
            let cookies: Vec<String> = std::mem::take(&mut self.cookies).into_iter().collect();
            return Some(cookies.join("; "));
        }
        self.values
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    pub fn cookies(&self) -> impl Iterator<Item = &str> { self.cookies.iter().map(String::as_str) }

    /// Ask for `length` bytes starting at `offset`.
    pub fn range(&mut self, offset: u64, length: u64) -> &mut Self {
        let last = (offset + length).saturating_sub(1);
        self.put(RANGE, format!("bytes={offset}-{last}"))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH)?.trim().parse().ok()
    }

    /// Full size of the resource: the total of `Content-Range` when present,
    /// otherwise `Content-Length`.
    pub fn content_full_size(&self) -> Option<u64> {
        if let Some(range) = self.get(CONTENT_RANGE) {
            return range.rsplit_once('/')?.1.trim().parse().ok();
        }
        self.content_length()
    }

    pub fn content_type(&self) -> Option<&str> { self.get(CONTENT_TYPE) }

    pub fn etag(&self) -> Option<&str> { self.get(ETAG) }

    /// All pairs with their original names; cookies are emitted as `Cookie`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(self.cookies.iter().map(|cookie| (COOKIE, cookie.as_str())))
    }

    pub fn len(&self) -> usize { self.values.len() + self.cookies.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() && self.cookies.is_empty() }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HttpHeader {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut header = HttpHeader::new();
        for (name, value) in iter {
            header.put(name, value);
        }
        header
    }
}

fn is_cookie(name: &str) -> bool {
    name.eq_ignore_ascii_case(COOKIE) || name.eq_ignore_ascii_case(SET_COOKIE)
}
