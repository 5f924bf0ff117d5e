use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::effects::cache::{CacheError, KvStore};

/// Durable memory of the last content fingerprint per key.
pub trait DigestStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn put(&self, key: &str, digest: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryDigestStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryDigestStore {
    pub fn new() -> Self { Self::default() }
}

impl DigestStore for MemoryDigestStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, digest: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), digest.to_string());
        Ok(())
    }
}

/// Fingerprints in a sled tree, flushed on every write.
///
/// The database stays open for as long as any clone of the store lives,
/// rather than being opened and closed around each `get` or `put`. A second
/// process opening the same directory meanwhile fails with a lock error.
#[derive(Clone)]
pub struct SledDigestStore {
    tree: sled::Tree,
}

impl SledDigestStore {
    /// Open a database of its own at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> { KvStore::open(path)?.digest_store() }

    pub(crate) fn from_tree(tree: sled::Tree) -> Self { Self { tree } }
}

impl DigestStore for SledDigestStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.tree.get(key.as_bytes())? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|e| CacheError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, digest: &str) -> Result<(), CacheError> {
        self.tree.insert(key.as_bytes(), digest.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store() {
        let store = MemoryDigestStore::new();
        assert_eq!(store.get("digest.a").unwrap(), None);
        store.put("digest.a", "abc").unwrap();
        store.put("digest.a", "def").unwrap();
        assert_eq!(store.get("digest.a").unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("digests");
        {
            let store = SledDigestStore::open(&path).unwrap();
            store.put("digest.GET http://localhost/", "0123").unwrap();
        }
        let store = SledDigestStore::open(&path).unwrap();
        assert_eq!(
            store.get("digest.GET http://localhost/").unwrap().as_deref(),
            Some("0123")
        );
        assert_eq!(store.get("digest.other").unwrap(), None);
    }
}
