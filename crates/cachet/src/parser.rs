//! Content parsers: turn a response stream into a value.

use std::io::{self, BufReader, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cachet_fs::StagedFile;
use cachet_verify::{DigestReader, Md5Hasher};
use serde::de::DeserializeOwned;

use crate::data::header::HttpHeader;
use crate::data::request::Request;
use crate::error::ParseError;

const FILE_CHUNK_BYTES: usize = 64 * 1024;
const SKIP_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

/// What a stream controller or parser knows about the stream it receives.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub request: &'a Request,
    /// Response header; absent for cached entries.
    pub header:  Option<&'a HttpHeader>,
    pub source:  Source,
    /// 1-based network attempt; 0 for cached entries.
    pub attempt: u32,
}

pub trait Parser<T> {
    fn parse(&self, ctx: &ParseContext<'_>, stream: &mut dyn Read) -> Result<T, ParseError>;
}

impl<T, F> Parser<T> for F
where
    F: Fn(&ParseContext<'_>, &mut dyn Read) -> Result<T, ParseError>,
{
    fn parse(&self, ctx: &ParseContext<'_>, stream: &mut dyn Read) -> Result<T, ParseError> {
        self(ctx, stream)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesParser;

impl Parser<Vec<u8>> for BytesParser {
    fn parse(&self, _: &ParseContext<'_>, stream: &mut dyn Read) -> Result<Vec<u8>, ParseError> {
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

/// UTF-8 text; invalid sequences fail the parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringParser;

impl Parser<String> for StringParser {
    fn parse(&self, ctx: &ParseContext<'_>, stream: &mut dyn Read) -> Result<String, ParseError> {
        let bytes = BytesParser.parse(ctx, stream)?;
        Ok(String::from_utf8(bytes)?)
    }
}

pub struct JsonParser<T>(PhantomData<fn() -> T>);

impl<T> JsonParser<T> {
    pub fn new() -> Self { Self(PhantomData) }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self { Self::new() }
}

impl<T: DeserializeOwned> Parser<T> for JsonParser<T> {
    fn parse(&self, _: &ParseContext<'_>, stream: &mut dyn Read) -> Result<T, ParseError> {
        Ok(serde_json::from_reader(BufReader::new(stream))?)
    }
}

/// Read and discard up to `n` bytes; fewer only at end of stream.
///
/// The skipped bytes still pass through the pipeline's stream, so they are
/// hashed, cached and subject to cancellation like any other read.
pub fn skip(stream: &mut dyn Read, n: u64) -> io::Result<u64> {
    let mut scratch = [0u8; SKIP_CHUNK_BYTES];
    let mut skipped = 0u64;
    while skipped < n {
        let want = (n - skipped).min(SKIP_CHUNK_BYTES as u64) as usize;
        match stream.read(&mut scratch[..want]) {
            Ok(0) => break,
            Ok(got) => skipped += got as u64,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(skipped)
}

pub type FileProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Streams the body into `destination`, replacing it only once the whole
/// body has arrived and, when an MD5 was given, matched it.
#[derive(Clone)]
pub struct FileParser {
    destination:  PathBuf,
    progress:     Option<(u64, FileProgress)>,
    expected_md5: Option<String>,
}

impl FileParser {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination:  destination.into(),
            progress:     None,
            expected_md5: None,
        }
    }

    /// Refuse to replace the destination unless the body hashes to `hex`.
    pub fn with_expected_md5(mut self, hex: impl Into<String>) -> Self {
        self.expected_md5 = Some(hex.into());
        self
    }

    /// Call `progress(written, total)` each time another `interval` bytes
    /// have been written, and once at the end.
    pub fn with_progress(
        mut self,
        interval: u64,
        progress: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some((interval.max(1), Arc::new(progress)));
        self
    }

    pub fn destination(&self) -> &Path { &self.destination }
}

impl Parser<PathBuf> for FileParser {
    fn parse(&self, ctx: &ParseContext<'_>, stream: &mut dyn Read) -> Result<PathBuf, ParseError> {
        let total = ctx.header.and_then(HttpHeader::content_full_size);
        let mut staged = StagedFile::create(&self.destination)?;
        let mut chunk = vec![0u8; FILE_CHUNK_BYTES];
        let mut written = 0u64;
        let mut next_report = self.progress.as_ref().map(|(interval, _)| *interval);
        let mut reader = DigestReader::new(stream, Md5Hasher::new());

        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            io::Write::write_all(&mut staged, &chunk[..n])?;
            written += n as u64;

            if let (Some((interval, progress)), Some(at)) = (&self.progress, next_report.as_mut()) {
                if written >= *at {
                    progress(written, total);
                    *at = written + interval;
                }
            }
        }

        if let Some(expected) = &self.expected_md5 {
            reader.finish(expected)?;
        }
        staged.commit()?;
        if let Some((_, progress)) = &self.progress {
            progress(written, total);
        }
        Ok(self.destination.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn ctx(request: &Request) -> ParseContext<'_> {
        ParseContext {
            request,
            header: None,
            source: Source::Network,
            attempt: 1,
        }
    }

    #[test]
    fn test_string_parser() {
        let request = Request::get("http://localhost/").unwrap();
        let text = StringParser.parse(&ctx(&request), &mut Cursor::new("héllo")).unwrap();
        assert_eq!(text, "héllo");
        assert!(StringParser.parse(&ctx(&request), &mut Cursor::new(vec![0xff, 0xfe])).is_err());
    }

    #[test]
    fn test_json_parser() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Item {
            id:   u32,
            name: String,
        }

        let request = Request::get("http://localhost/").unwrap();
        let parser = JsonParser::<Item>::new();
        let item = parser
            .parse(&ctx(&request), &mut Cursor::new(r#"{"id": 7, "name": "seven"}"#))
            .unwrap();
        assert_eq!(item, Item { id: 7, name: "seven".into() });
        assert!(parser.parse(&ctx(&request), &mut Cursor::new("{")).is_err());
    }

    #[test]
    fn test_closure_parser() {
        let request = Request::get("http://localhost/").unwrap();
        let count = |_: &ParseContext<'_>, stream: &mut dyn Read| -> Result<usize, ParseError> {
            Ok(std::io::copy(stream, &mut std::io::sink())? as usize)
        };
        assert_eq!(count.parse(&ctx(&request), &mut Cursor::new([0u8; 9])).unwrap(), 9);
    }

    #[test]
    fn test_file_parser_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download.bin");
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let parser = FileParser::new(&destination)
            .with_progress(100_000, move |written, total| sink.lock().unwrap().push((written, total)));

        let request = Request::get("http://localhost/").unwrap();
        let header = HttpHeader::new().with("Content-Length", "200000");
        let context = ParseContext {
            header: Some(&header),
            ..ctx(&request)
        };
        let body = vec![7u8; 200_000];
        let path = parser.parse(&context, &mut Cursor::new(body.clone())).unwrap();

        assert_eq!(path, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), body);
        let reports = reports.lock().unwrap();
        assert!(reports.len() >= 2);
        assert_eq!(reports.last(), Some(&(200_000, Some(200_000))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_skip_discards_prefix() {
        let request = Request::get("http://localhost/").unwrap();
        let after_prefix = |_: &ParseContext<'_>, stream: &mut dyn Read| -> Result<String, ParseError> {
            skip(stream, 6)?;
            StringParser.parse(&ctx(&request), stream)
        };
        let text = after_prefix.parse(&ctx(&request), &mut Cursor::new("HEADERbody")).unwrap();
        assert_eq!(text, "body");

        let mut short = Cursor::new(vec![0u8; 10]);
        assert_eq!(skip(&mut short, 10_000).unwrap(), 10);
    }

    #[test]
    fn test_file_parser_checks_md5() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("artifact.bin");
        std::fs::write(&destination, b"previous").unwrap();
        let request = Request::get("http://localhost/").unwrap();

        let wrong = FileParser::new(&destination).with_expected_md5("00000000000000000000000000000000");
        assert!(wrong.parse(&ctx(&request), &mut Cursor::new("hello world")).is_err());
        assert_eq!(std::fs::read(&destination).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let right = FileParser::new(&destination).with_expected_md5("5EB63BBBE01EEED093CB22BB8F5ACDC3");
        right.parse(&ctx(&request), &mut Cursor::new("hello world")).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello world");
    }

    #[test]
    fn test_file_parser_failure_keeps_destination() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("connection reset"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download.bin");
        std::fs::write(&destination, b"previous").unwrap();

        let request = Request::get("http://localhost/").unwrap();
        let result = FileParser::new(&destination).parse(&ctx(&request), &mut Broken);

        assert!(result.is_err());
        assert_eq!(std::fs::read(&destination).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
