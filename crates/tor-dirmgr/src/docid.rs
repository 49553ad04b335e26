//! Identifiers for the documents this crate can fetch or cache.
//!
//! A [`DocId`] names one fetchable thing uniquely enough to dedupe
//! in-flight requests and to map a downloaded blob back to where it
//! should be ingested.

use tor_llcrypto::pk::rsa::RsaIdentity;

use crate::netstatus::ConsensusFlavor;

/// The SHA-256 digest used to key a microdescriptor.
pub type MdDigest = [u8; 32];

/// Identifies one document (or document set) that the download
/// scheduler can want.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DocId {
    /// The current consensus of a given flavor.
    Consensus(ConsensusFlavor),
    /// A batch of microdescriptors, by digest.
    Microdesc(Vec<MdDigest>),
    /// A batch of authority certificates, by (identity, signing-key).
    AuthCert(Vec<(RsaIdentity, RsaIdentity)>),
}

impl DocId {
    /// Return a short, stable string describing this request, for logs
    /// and for the in-flight dedup key.
    pub fn describe(&self) -> String {
        match self {
            DocId::Consensus(f) => format!("consensus/{}", f.name()),
            DocId::Microdesc(ds) => format!("microdesc/{}-digests", ds.len()),
            DocId::AuthCert(ks) => format!("authcert/{}-keys", ks.len()),
        }
    }
}
