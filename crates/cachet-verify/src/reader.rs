use std::io::{self, Read};

use crate::{Hasher, Result, VerificationError, to_hex};

/// Reader that hashes data as it passes through.
///
/// Only bytes returned to the caller reach the hasher, so the digest always
/// matches what was consumed.
pub struct DigestReader<R, H> {
    reader:     R,
    hasher:     H,
    bytes_read: u64,
}

impl<R, H> DigestReader<R, H> {
    pub fn new(reader: R, hasher: H) -> Self {
        Self {
            reader,
            hasher,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 { self.bytes_read }
}

impl<R, H: Hasher> DigestReader<R, H> {
    /// Consume the reader and return the raw digest.
    pub fn finalize(self) -> Vec<u8> { self.hasher.finalize() }

    /// Consume the reader and return the lowercase hex digest.
    pub fn hex_digest(self) -> String { to_hex(&self.finalize()) }

    /// Compare the digest against an expected hex string.
    pub fn finish(self, expected_hex: &str) -> Result<()> {
        let actual = self.hex_digest();
        if actual.eq_ignore_ascii_case(expected_hex) {
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                expected: expected_hex.to_string(),
                actual,
            })
        }
    }
}

impl<R: Read, H: Hasher> Read for DigestReader<R, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes_read += n as u64;
        }
        Ok(n)
    }
}
