//! Signature-bound values: things that must be checked against a key
//! before they are trustworthy.

/// A value that can check its own signature(s), using key material it
/// carries itself (e.g. a certificate whose signing key is embedded,
/// or identified by a fingerprint the caller already trusts).
pub trait SelfSigned<T> {
    /// An error type returned when a signature check fails.
    type Error;

    /// Check that this object's signature(s) are valid, and unwrap it
    /// into the validated type if so.
    fn check_signature(self) -> Result<T, Self::Error>;

    /// Return this value, not checking any signature.
    fn dangerously_assume_wellsigned(self) -> T;
}

/// A value whose signature(s) can only be checked against external key
/// material supplied by the caller (e.g. a consensus, whose signers
/// are the directory authorities the caller already knows about).
pub trait ExternallySigned<T> {
    /// The type of the external key material needed to check this.
    type Key: ?Sized;
    /// An error type returned when a signature check fails.
    type Error;

    /// Check that this object is signed by `k`, and unwrap it into the
    /// validated type if so.
    fn check_signature(self, k: &Self::Key) -> Result<T, Self::Error>;

    /// Return this value, not checking any signature.
    fn dangerously_assume_wellsigned(self) -> T;
}
