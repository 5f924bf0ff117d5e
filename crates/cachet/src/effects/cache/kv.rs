use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheController, CacheError, CacheReader, CacheWriter, SizeLimit, accepts_response};
use crate::core::is_expired;
use crate::data::header::HttpHeader;
use crate::data::request::Request;
use crate::effects::digest_store::SledDigestStore;

const CACHE_TREE: &str = "cache";
const DIGEST_TREE: &str = "digest";

/// A sled database holding the cache tree and the digest tree.
#[derive(Clone)]
pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, CacheError> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    pub fn cache_controller(&self) -> Result<KvCacheController, CacheError> {
        Ok(KvCacheController {
            tree: self.db.open_tree(CACHE_TREE)?,
        })
    }

    pub fn digest_store(&self) -> Result<SledDigestStore, CacheError> {
        Ok(SledDigestStore::from_tree(self.db.open_tree(DIGEST_TREE)?))
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    stored_at_ms: u64,
    body:         Vec<u8>,
}

/// Cache entries as single values in a sled tree.
#[derive(Clone)]
pub struct KvCacheController {
    tree: sled::Tree,
}

impl KvCacheController {
    fn key(request: &Request) -> Vec<u8> { format!("cache:{}", request.cache_key()).into_bytes() }
}

impl CacheController for KvCacheController {
    fn open_cache(&self, request: &Request) -> Result<Option<CacheReader>, CacheError> {
        let policy = request.cache_policy();
        if !policy.is_enabled() {
            return Ok(None);
        }

        let key = Self::key(request);
        let Some(raw) = self.tree.get(&key)? else {
            return Ok(None);
        };

        let entry: StoredEntry = match postcard::from_bytes(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "dropping undecodable cache entry");
                self.tree.remove(&key)?;
                return Ok(None);
            }
        };

        let stored_at = UNIX_EPOCH + Duration::from_millis(entry.stored_at_ms);
        if is_expired(stored_at, policy.ttl(), SystemTime::now()) {
            debug!("evicting expired cache entry");
            self.tree.remove(&key)?;
            return Ok(None);
        }

        Ok(Some(Box::new(Cursor::new(entry.body))))
    }

    fn new_cache_writer(
        &self,
        request: &Request,
        header: &HttpHeader,
    ) -> Result<Option<Box<dyn CacheWriter>>, CacheError> {
        let policy = request.cache_policy();
        if !accepts_response(policy, header) {
            return Ok(None);
        }
        Ok(Some(Box::new(KvCacheWriter {
            tree: self.tree.clone(),
            key:  Self::key(request),
            body: Vec::new(),
            size: SizeLimit::new(policy.max_item_bytes()),
        })))
    }
}

/// Buffers the body and replaces the stored value in one insert on commit.
pub struct KvCacheWriter {
    tree: sled::Tree,
    key:  Vec<u8>,
    body: Vec<u8>,
    size: SizeLimit,
}

impl CacheWriter for KvCacheWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
        if self.size.admit(chunk.len()) {
            self.body.extend_from_slice(chunk);
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), CacheError> {
        let KvCacheWriter { tree, key, body, size } = *self;
        size.check()?;
        let entry = StoredEntry {
            stored_at_ms: now_millis(),
            body,
        };
        tree.insert(key, postcard::to_allocvec(&entry)?)?;
        tree.flush()?;
        debug!(bytes = entry.body.len(), "cache entry committed");
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), CacheError> { Ok(()) }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::policy::CachePolicy;
    use std::io::Read;

    fn request(ttl: Duration) -> Request {
        Request::get("http://localhost/kv")
            .unwrap()
            .with_cache_policy(CachePolicy::new(ttl).with_max_item_bytes(8))
    }

    fn read_all(reader: CacheReader) -> Vec<u8> {
        let mut reader = reader;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_commit_then_open() {
        let store = KvStore::temporary().unwrap();
        let controller = store.cache_controller().unwrap();
        let request = request(Duration::from_secs(60));

        assert!(controller.open_cache(&request).unwrap().is_none());

        let mut writer = controller.new_cache_writer(&request, &HttpHeader::new()).unwrap().unwrap();
        writer.write(b"abc").unwrap();
        writer.write(b"def").unwrap();
        writer.commit().unwrap();

        let reader = controller.open_cache(&request).unwrap().unwrap();
        assert_eq!(read_all(reader), b"abcdef");
    }

    #[test]
    fn test_abort_stores_nothing() {
        let store = KvStore::temporary().unwrap();
        let controller = store.cache_controller().unwrap();
        let request = request(Duration::from_secs(60));

        let mut writer = controller.new_cache_writer(&request, &HttpHeader::new()).unwrap().unwrap();
        writer.write(b"abc").unwrap();
        writer.abort().unwrap();

        assert!(controller.open_cache(&request).unwrap().is_none());
    }

    #[test]
    fn test_oversized_commit_rejected() {
        let store = KvStore::temporary().unwrap();
        let controller = store.cache_controller().unwrap();
        let request = request(Duration::from_secs(60));

        let mut writer = controller.new_cache_writer(&request, &HttpHeader::new()).unwrap().unwrap();
        writer.write(b"0123456789").unwrap();
        assert!(matches!(writer.commit(), Err(CacheError::TooLarge { .. })));
        assert!(controller.open_cache(&request).unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_removed() {
        let store = KvStore::temporary().unwrap();
        let controller = store.cache_controller().unwrap();
        let request = request(Duration::from_secs(1));

        let stale = StoredEntry {
            stored_at_ms: now_millis() - 60_000,
            body:         b"old".to_vec(),
        };
        let key = KvCacheController::key(&request);
        controller
            .tree
            .insert(&key, postcard::to_allocvec(&stale).unwrap())
            .unwrap();

        assert!(controller.open_cache(&request).unwrap().is_none());
        assert!(controller.tree.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_garbage_entry_is_a_miss() {
        let store = KvStore::temporary().unwrap();
        let controller = store.cache_controller().unwrap();
        let request = request(Duration::from_secs(60));
        let key = KvCacheController::key(&request);
        controller.tree.insert(&key, &[0xFFu8; 3][..]).unwrap();

        assert!(controller.open_cache(&request).unwrap().is_none());
    }
}
