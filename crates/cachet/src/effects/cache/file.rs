use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cachet_fs::{StagedFile, ensure_dir, remove_file_if_exists};
use tracing::debug;

use super::{CacheController, CacheError, CacheReader, CacheWriter, SizeLimit, accepts_response};
use crate::core::{entry_file_name, is_expired};
use crate::data::config::DEFAULT_CACHE_EXTENSION;
use crate::data::header::HttpHeader;
use crate::data::request::Request;

/// One file per cache key under a root directory, aged by modification time.
#[derive(Debug, Clone)]
pub struct FileCacheController {
    root:      PathBuf,
    extension: String,
}

impl FileCacheController {
    /// Use `root` as the entry directory, creating it when missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self {
            root,
            extension: DEFAULT_CACHE_EXTENSION.to_string(),
        })
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn entry_path(&self, request: &Request) -> PathBuf {
        self.root
            .join(entry_file_name(&request.cache_key(), &self.extension))
    }
}

impl CacheController for FileCacheController {
    fn open_cache(&self, request: &Request) -> Result<Option<CacheReader>, CacheError> {
        let policy = request.cache_policy();
        if !policy.is_enabled() {
            return Ok(None);
        }

        let path = self.entry_path(request);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if is_expired(metadata.modified()?, policy.ttl(), SystemTime::now()) {
            debug!(path = %path.display(), "evicting expired cache entry");
            remove_file_if_exists(&path)?;
            return Ok(None);
        }

        match File::open(&path) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
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

        ensure_dir(&self.root)?;
        let staged = StagedFile::create(self.entry_path(request))?;
        Ok(Some(Box::new(FileCacheWriter::new(staged, policy.max_item_bytes()))))
    }
}

/// Writes into `<entry>.<millis>` and renames onto the entry on commit.
pub struct FileCacheWriter {
    staged: StagedFile,
    size:   SizeLimit,
}

impl FileCacheWriter {
    pub fn new(staged: StagedFile, max_item_bytes: u64) -> Self {
        Self {
            staged,
            size: SizeLimit::new(max_item_bytes),
        }
    }
}

impl CacheWriter for FileCacheWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
        if !self.size.admit(chunk.len()) {
            return Ok(());
        }
        self.staged.write_all(chunk).map_err(|e| cachet_fs::Error::Write {
            path:   self.staged.staging_path().to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), CacheError> {
        let FileCacheWriter { staged, size } = *self;
        if let Err(e) = size.check() {
            staged.abort()?;
            return Err(e);
        }
        let target = staged.target_path().to_path_buf();
        staged.commit()?;
        debug!(path = %target.display(), "cache entry committed");
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), CacheError> {
        self.staged.abort()?;
        Ok(())
    }
}
