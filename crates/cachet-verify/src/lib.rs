//! Content fingerprints computed while bytes stream through.
//!
//! Provides a minimal [`Hasher`] trait, adapters for any RustCrypto
//! [`digest::Digest`], and a [`DigestReader`] that hashes exactly the bytes it
//! hands to its caller.
//!
//! # Example
//!
//! ```
//! use std::io::Read;
//! use cachet_verify::{DigestReader, Md5Hasher};
//!
//! let mut reader = DigestReader::new(&b"hello world"[..], Md5Hasher::new());
//! let mut sink = Vec::new();
//! reader.read_to_end(&mut sink).unwrap();
//!
//! assert_eq!(reader.hex_digest(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
//! ```

pub use self::error::{Result, VerificationError};
pub use self::hasher::{DigestHasher, Hasher, to_hex};
pub use self::reader::DigestReader;

#[cfg(feature = "md5")]
pub use self::hasher::Md5Hasher;

#[cfg(feature = "sha256")]
pub use self::hasher::Sha256Hasher;

mod error;
mod hasher;
mod reader;
