use std::time::{Duration, SystemTime};

use cachet_verify::Sha256Hasher;

/// File name of a cache entry: a one-way hash of the key plus an extension.
pub fn entry_file_name(cache_key: &str, extension: &str) -> String {
    format!("{}.{extension}", Sha256Hasher::hex_digest(cache_key.as_bytes()))
}

/// Key under which the last content fingerprint of `cache_key` is kept.
pub fn digest_key(cache_key: &str) -> String { format!("digest.{cache_key}") }

/// An entry stored at `stored_at` is stale once `stored_at + ttl < now`.
pub fn is_expired(stored_at: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    match stored_at.checked_add(ttl) {
        Some(expires_at) => expires_at < now,
        None => false,
    }
}
