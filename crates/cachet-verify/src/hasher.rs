use digest::Digest;

pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

/// Lowercase hex rendering used for every fingerprint in the workspace.
pub fn to_hex(digest: &[u8]) -> String { hex::encode(digest) }

/// Adapter from any RustCrypto [`Digest`] to [`Hasher`].
#[derive(Clone, Default)]
pub struct DigestHasher<D: Digest + Send>(D);

impl<D: Digest + Send> DigestHasher<D> {
    pub fn new() -> Self { Self(D::new()) }

    pub fn digest(data: &[u8]) -> Vec<u8> { D::digest(data).to_vec() }

    pub fn hex_digest(data: &[u8]) -> String { to_hex(&Self::digest(data)) }
}

impl<D: Digest + Send> Hasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) { Digest::update(&mut self.0, data); }
    fn finalize(self) -> Vec<u8> { self.0.finalize().to_vec() }
}

/// 128-bit content fingerprint of response bodies.
#[cfg(feature = "md5")]
pub type Md5Hasher = DigestHasher<md5::Md5>;

/// Used for naming cache entries from their keys.
#[cfg(feature = "sha256")]
pub type Sha256Hasher = DigestHasher<sha2::Sha256>;
