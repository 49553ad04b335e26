//! Public-key cryptography for verifying directory documents.
//!
//! Directory authorities sign consensuses and certificates with RSA
//! (the "identity key") and, on newer consensus methods, Ed25519. Both
//! live here so that signature-verification code can work across
//! either kind uniformly via [`ValidatableSignature`].

pub mod ed25519;
pub mod rsa;

/// A type for a validatable signature.
///
/// It bundles the signature, the public key, and the document bytes it
/// covers, so a batch of heterogeneous signatures can be checked
/// uniformly.
pub trait ValidatableSignature {
    /// Check whether this signature is a correct signature for the document.
    fn is_valid(&self) -> bool;
}

/// Check whether every signature in `v` is valid.
///
/// Returns `true` only if all of them are; short-circuits on the first
/// failure is *not* guaranteed, since callers may want every signature
/// evaluated to know which signer failed.
pub fn validate_all_sigs(v: &[Box<dyn ValidatableSignature>]) -> bool {
    v.iter().all(|sig| sig.is_valid())
}
