//! Ed25519 keys and signatures, used by newer consensus methods.

use std::fmt;

use base64ct::Encoding;

use super::ValidatableSignature;

pub use ed25519_dalek::{PublicKey, Signature};

/// A 32-byte Ed25519 identity key, as carried in a routerstatus's `id`
/// line.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Ed25519Identity {
    id: [u8; 32],
}

impl Ed25519Identity {
    /// Construct an `Ed25519Identity` from a 32-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Ed25519Identity {
            id: bytes.try_into().ok()?,
        })
    }

    /// Return the byte representation of this identity.
    pub fn as_bytes(&self) -> &[u8] {
        &self.id[..]
    }
}

impl From<[u8; 32]> for Ed25519Identity {
    fn from(id: [u8; 32]) -> Self {
        Ed25519Identity { id }
    }
}

impl fmt::Display for Ed25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base64ct::Base64Unpadded::encode_string(&self.id))
    }
}

impl fmt::Debug for Ed25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Identity({})", self)
    }
}

/// A signature, bundled with the key and document it claims to cover.
pub struct ValidatableEd25519Signature {
    /// The public key to check against.
    public_key: PublicKey,
    /// The claimed signature.
    signature: Signature,
    /// The exact bytes that were signed.
    entire_text_of_signed_thing: Vec<u8>,
}

impl ValidatableEd25519Signature {
    /// Construct a new `ValidatableEd25519Signature`.
    pub fn new(public_key: PublicKey, signature: Signature, text: &[u8]) -> Self {
        ValidatableEd25519Signature {
            public_key,
            signature,
            entire_text_of_signed_thing: text.into(),
        }
    }
}

impl ValidatableSignature for ValidatableEd25519Signature {
    fn is_valid(&self) -> bool {
        use ed25519_dalek::Verifier;
        self.public_key
            .verify(&self.entire_text_of_signed_thing, &self.signature)
            .is_ok()
    }
}

/// Verify a batch of Ed25519 signatures at once.
///
/// Returns `true` only if every signature in the batch is valid;
/// returns `true` vacuously for an empty batch.
pub fn validate_batch(sigs: &[&ValidatableEd25519Signature]) -> bool {
    if sigs.is_empty() {
        return true;
    }
    sigs.iter().all(|s| s.is_valid())
}
