//! Digest algorithms used by directory documents.
//!
//! Consensuses and microdescriptors are keyed and cross-referenced by
//! the digests of their own text, so these re-exports are the single
//! place that names which hash function backs each kind of digest.

/// SHA-1, used only for the (deprecated) v2 digest of a router
/// descriptor-style document.
pub use sha1::Sha1;

/// SHA-256, used for microdescriptor digests and for most modern
/// consensus method digests.
pub use sha2::Sha256;

/// SHA3-256, used by some newer consensus methods.
pub use sha3::Sha3_256;

use digest::Digest;

/// Compute the SHA-256 digest of `data`.
pub fn digest_sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// Compute the SHA-1 digest of `data`.
pub fn digest_sha1(data: &[u8]) -> [u8; 20] {
    let mut h = Sha1::new();
    h.update(data);
    h.finalize().into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sha256_of_empty() {
        let d = digest_sha256(b"");
        assert_eq!(
            hex::encode(d),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
