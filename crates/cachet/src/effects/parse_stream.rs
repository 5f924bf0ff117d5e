use std::io::{self, Read};

use cachet_verify::{DigestReader, Md5Hasher};
use tracing::warn;

use crate::data::profile::NetworkProfile;
use crate::data::progress::{CancelPredicate, FetchPhase, Progress};
use crate::data::request::Request;
use crate::effects::cache::CacheWriter;

/// Upper bound on a single read from the underlying stream.
pub const MAX_READ_BYTES: usize = 4096;

/// Error payload of reads refused because the call was canceled.
#[derive(Debug, thiserror::Error)]
#[error("task canceled")]
pub struct Canceled;

/// Binds the cancel predicate to one phase of one call.
pub(crate) struct Checkpoint<'a> {
    cancel:  &'a dyn CancelPredicate,
    request: &'a Request,
    phase:   FetchPhase,
    attempt: u32,
}

impl<'a> Checkpoint<'a> {
    pub(crate) fn new(
        cancel: &'a dyn CancelPredicate,
        request: &'a Request,
        phase: FetchPhase,
        attempt: u32,
    ) -> Self {
        Self {
            cancel,
            request,
            phase,
            attempt,
        }
    }

    pub(crate) fn is_canceled(&self, bytes_read: u64) -> bool {
        self.cancel.is_canceled(&Progress {
            request: self.request,
            phase: self.phase,
            attempt: self.attempt,
            bytes_read,
        })
    }
}

/// How a stream ended, collected after the parser is done with it.
#[derive(Debug)]
pub(crate) struct StreamSummary {
    pub digest:      String,
    pub bytes_read:  u64,
    pub canceled:    bool,
    pub cache_lost:  bool,
    pub inner_error: Option<io::ErrorKind>,
}

/// Digest-tracking reader between the raw body and the stream controller.
///
/// Every delivered byte is hashed, teed to the attached cache writer and
/// counted into the profile. Reads are capped at [`MAX_READ_BYTES`] and the
/// cancel predicate is consulted before each one. There is no seeking;
/// [`skip`](crate::parser::skip) reads and discards.
pub(crate) struct ParseStream<'a, R> {
    inner:       DigestReader<R, Md5Hasher>,
    checkpoint:  &'a Checkpoint<'a>,
    cache:       Option<&'a mut (dyn CacheWriter + 'static)>,
    profile:     Option<&'a mut NetworkProfile>,
    canceled:    bool,
    cache_lost:  bool,
    inner_error: Option<io::ErrorKind>,
}

impl<'a, R: Read> ParseStream<'a, R> {
    pub(crate) fn new(inner: R, checkpoint: &'a Checkpoint<'a>) -> Self {
        Self {
            inner: DigestReader::new(inner, Md5Hasher::new()),
            checkpoint,
            cache: None,
            profile: None,
            canceled: false,
            cache_lost: false,
            inner_error: None,
        }
    }

    pub(crate) fn with_cache(mut self, cache: Option<&'a mut (dyn CacheWriter + 'static)>) -> Self {
        self.cache = cache;
        self
    }

    pub(crate) fn with_profile(mut self, profile: Option<&'a mut NetworkProfile>) -> Self {
        self.profile = profile;
        self
    }

    pub(crate) fn bytes_read(&self) -> u64 { self.inner.bytes_read() }

    pub(crate) fn finish(self) -> StreamSummary {
        let bytes_read = self.inner.bytes_read();
        StreamSummary {
            digest: self.inner.hex_digest(),
            bytes_read,
            canceled: self.canceled,
            cache_lost: self.cache_lost,
            inner_error: self.inner_error,
        }
    }

    fn ensure_not_canceled(&mut self) -> io::Result<()> {
        if self.canceled || self.checkpoint.is_canceled(self.inner.bytes_read()) {
            self.canceled = true;
            return Err(io::Error::other(Canceled));
        }
        Ok(())
    }

    fn observe(&mut self, chunk: &[u8]) {
        if let Some(profile) = self.profile.as_deref_mut() {
            profile.on_download_step(chunk.len() as u64);
        }
        if let Some(writer) = self.cache.as_deref_mut() {
            if let Err(e) = writer.write(chunk) {
                warn!(error = %e, "cache write failed, entry will be discarded");
                self.cache = None;
                self.cache_lost = true;
            }
        }
    }
}

impl<R: Read> Read for ParseStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_not_canceled()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(MAX_READ_BYTES);
        let n = match self.inner.read(&mut buf[..len]) {
            Ok(n) => n,
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.inner_error = Some(e.kind());
                }
                return Err(e);
            }
        };
        if n > 0 {
            self.observe(&buf[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::progress::NeverCancel;
    use crate::effects::cache::CacheError;
    use crate::parser::skip;
    use std::io::Cursor;

    #[derive(Default)]
    struct RecordingWriter {
        written: u64,
        fail:    bool,
    }

    impl CacheWriter for RecordingWriter {
        fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
            if self.fail {
                return Err(CacheError::Corrupt("disk full".into()));
            }
            self.written += chunk.len() as u64;
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), CacheError> {
            assert!(self.written > 0);
            Ok(())
        }

        fn abort(self: Box<Self>) -> Result<(), CacheError> { Ok(()) }
    }

    /// Reports the size of every read request it receives.
    struct ReadSizes {
        inner: Cursor<Vec<u8>>,
        sizes: Vec<usize>,
    }

    impl Read for ReadSizes {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.sizes.push(buf.len());
            self.inner.read(buf)
        }
    }

    fn request() -> Request { Request::get("http://localhost/stream").unwrap() }

    #[test]
    fn test_digest_and_tee_cover_delivered_bytes() {
        let request = request();
        let checkpoint = Checkpoint::new(&NeverCancel, &request, FetchPhase::Receiving, 1);
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut writer: Box<dyn CacheWriter> = Box::new(RecordingWriter::default());
        let mut profile = NetworkProfile::new();

        let mut stream = ParseStream::new(Cursor::new(data.clone()), &checkpoint)
            .with_cache(Some(writer.as_mut()))
            .with_profile(Some(&mut profile));
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        let summary = stream.finish();

        assert_eq!(out, data);
        assert_eq!(summary.bytes_read, 10_000);
        assert_eq!(summary.digest, Md5Hasher::hex_digest(&data));
        assert!(!summary.cache_lost);
        assert_eq!(profile.download_bytes(), 10_000);
        writer.commit().unwrap();
    }

    #[test]
    fn test_reads_are_capped() {
        let request = request();
        let checkpoint = Checkpoint::new(&NeverCancel, &request, FetchPhase::Receiving, 1);
        let mut source = ReadSizes {
            inner: Cursor::new(vec![0u8; 20_000]),
            sizes: Vec::new(),
        };

        let mut stream = ParseStream::new(&mut source, &checkpoint);
        let mut big = vec![0u8; 16_384];
        let n = stream.read(&mut big).unwrap();
        drop(stream);

        assert_eq!(n, MAX_READ_BYTES);
        assert!(source.sizes.iter().all(|size| *size <= MAX_READ_BYTES));
    }

    #[test]
    fn test_cancel_before_read() {
        let request = request();
        let after_8k = |p: &Progress<'_>| p.bytes_read >= 8192;
        let checkpoint = Checkpoint::new(&after_8k, &request, FetchPhase::Receiving, 1);

        let mut stream = ParseStream::new(Cursor::new(vec![1u8; 64 * 1024]), &checkpoint);
        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        assert!(err.get_ref().is_some_and(|inner| inner.is::<Canceled>()));
        assert!(out.len() >= 8192 && out.len() < 8192 + MAX_READ_BYTES);

        let summary = stream.finish();
        assert!(summary.canceled);
    }

    #[test]
    fn test_skip_reads_and_hashes() {
        let request = request();
        let checkpoint = Checkpoint::new(&NeverCancel, &request, FetchPhase::Receiving, 1);
        let data = b"0123456789".repeat(1000);

        let mut stream = ParseStream::new(Cursor::new(data.clone()), &checkpoint);
        assert_eq!(skip(&mut stream, 9_000).unwrap(), 9_000);
        assert_eq!(stream.bytes_read(), 9_000);
        assert_eq!(skip(&mut stream, 5_000).unwrap(), 1_000);

        assert_eq!(stream.finish().digest, Md5Hasher::hex_digest(&data));
    }

    #[test]
    fn test_skip_checks_cancel() {
        let request = request();
        let always = |_: &Progress<'_>| true;
        let checkpoint = Checkpoint::new(&always, &request, FetchPhase::Receiving, 1);

        let mut stream = ParseStream::new(Cursor::new(vec![0u8; 10]), &checkpoint);
        assert!(skip(&mut stream, 5).is_err());
        assert_eq!(stream.bytes_read(), 0);
        assert!(stream.finish().canceled);
    }

    #[test]
    fn test_failing_cache_is_detached() {
        let request = request();
        let checkpoint = Checkpoint::new(&NeverCancel, &request, FetchPhase::Receiving, 1);
        let mut writer: Box<dyn CacheWriter> = Box::new(RecordingWriter {
            written: 0,
            fail:    true,
        });

        let mut stream = ParseStream::new(Cursor::new(vec![5u8; 100]), &checkpoint)
            .with_cache(Some(writer.as_mut()));
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        assert_eq!(out.len(), 100);
        assert!(stream.finish().cache_lost);
    }

    #[test]
    fn test_inner_error_kind_recorded() {
        struct TimesOut;
        impl Read for TimesOut {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
            }
        }

        let request = request();
        let checkpoint = Checkpoint::new(&NeverCancel, &request, FetchPhase::Receiving, 1);
        let mut stream = ParseStream::new(TimesOut, &checkpoint);
        assert!(stream.read(&mut [0u8; 8]).is_err());

        let summary = stream.finish();
        assert_eq!(summary.inner_error, Some(io::ErrorKind::TimedOut));
        assert!(!summary.canceled);
    }
}
