use std::io::{self, BufReader, Cursor, Read};

use crate::data::config::DEFAULT_STREAM_BUFFER_BYTES;
use crate::parser::ParseContext;

/// Adapts the digest-tracking stream before the parser sees it.
pub trait StreamController: Send + Sync {
    fn wrap<'s>(
        &self,
        ctx: &ParseContext<'_>,
        stream: &'s mut dyn Read,
    ) -> io::Result<Box<dyn Read + 's>>;
}

/// Hands the stream through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStreamController;

impl StreamController for RawStreamController {
    fn wrap<'s>(&self, _: &ParseContext<'_>, stream: &'s mut dyn Read) -> io::Result<Box<dyn Read + 's>> {
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferedStreamController {
    capacity: usize,
}

impl BufferedStreamController {
    pub fn new(capacity: usize) -> Self { Self { capacity: capacity.max(1) } }

    pub fn capacity(&self) -> usize { self.capacity }
}

impl Default for BufferedStreamController {
    fn default() -> Self { Self::new(DEFAULT_STREAM_BUFFER_BYTES) }
}

impl StreamController for BufferedStreamController {
    fn wrap<'s>(&self, _: &ParseContext<'_>, stream: &'s mut dyn Read) -> io::Result<Box<dyn Read + 's>> {
        Ok(Box::new(BufReader::with_capacity(self.capacity, stream)))
    }
}

/// Reads the whole body into memory before parsing starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayStreamController;

impl StreamController for ByteArrayStreamController {
    fn wrap<'s>(&self, ctx: &ParseContext<'_>, stream: &'s mut dyn Read) -> io::Result<Box<dyn Read + 's>> {
        let hint = ctx
            .header
            .and_then(|header| header.content_length())
            .unwrap_or(0)
            .min(DEFAULT_STREAM_BUFFER_BYTES as u64 * 32);
        let mut body = Vec::with_capacity(hint as usize);
        stream.read_to_end(&mut body)?;
        Ok(Box::new(Cursor::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::request::Request;
    use crate::parser::Source;

    /// Counts how many bytes have been pulled from the source.
    struct Counting<'a> {
        inner:  Cursor<Vec<u8>>,
        pulled: &'a mut usize,
    }

    impl Read for Counting<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            *self.pulled += n;
            Ok(n)
        }
    }

    fn ctx(request: &Request) -> ParseContext<'_> {
        ParseContext {
            request,
            header: None,
            source: Source::Network,
            attempt: 1,
        }
    }

    #[test]
    fn test_raw_is_lazy() {
        let request = Request::get("http://localhost/").unwrap();
        let mut pulled = 0;
        {
            let mut source = Counting {
                inner:  Cursor::new(vec![1u8; 100]),
                pulled: &mut pulled,
            };
            let mut wrapped = RawStreamController.wrap(&ctx(&request), &mut source).unwrap();
            let mut first = [0u8; 10];
            wrapped.read_exact(&mut first).unwrap();
        }
        assert_eq!(pulled, 10);
    }

    #[test]
    fn test_byte_array_materializes_everything() {
        let request = Request::get("http://localhost/").unwrap();
        let mut pulled = 0;
        {
            let mut source = Counting {
                inner:  Cursor::new(vec![1u8; 100]),
                pulled: &mut pulled,
            };
            let mut wrapped = ByteArrayStreamController.wrap(&ctx(&request), &mut source).unwrap();
            let mut first = [0u8; 10];
            wrapped.read_exact(&mut first).unwrap();
        }
        assert_eq!(pulled, 100);
    }

    #[test]
    fn test_buffered_delivers_same_bytes() {
        let request = Request::get("http://localhost/").unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let mut source = Cursor::new(data.clone());
        let controller = BufferedStreamController::default();
        assert_eq!(controller.capacity(), 32 * 1024);

        let mut wrapped = controller.wrap(&ctx(&request), &mut source).unwrap();
        let mut out = Vec::new();
        wrapped.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
