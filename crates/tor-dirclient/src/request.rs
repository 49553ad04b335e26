//! Requests for specific directory resources.
//!
//! Each request knows how to render itself as the HTTP-style resource
//! path the Tor directory protocol uses; nothing here talks to the
//! network.

use tor_llcrypto::pk::rsa::RsaIdentity;

/// A request for some directory resource.
pub trait Request {
    /// Return the HTTP-style resource path for this request, e.g.
    /// `/tor/status-vote/current/consensus/microdesc`.
    fn make_resource_path(&self) -> String;

    /// Return true if a compressed response is acceptable.
    fn compressible(&self) -> bool {
        true
    }
}

/// A request for the current consensus, by flavor.
#[derive(Clone, Debug)]
pub struct ConsensusRequest {
    /// Which consensus flavor to fetch (e.g. "microdesc", "ns").
    flavor: String,
    /// Digests of consensuses we already have, so the cache can reply
    /// with a diff instead of the full document if it wants to.
    if_modified_since_digests: Vec<String>,
}

impl ConsensusRequest {
    /// Request the current consensus of the given flavor.
    pub fn new(flavor: impl Into<String>) -> Self {
        ConsensusRequest {
            flavor: flavor.into(),
            if_modified_since_digests: Vec::new(),
        }
    }

    /// Tell the cache which consensus digests we already hold.
    pub fn add_held_digest(&mut self, digest: impl Into<String>) {
        self.if_modified_since_digests.push(digest.into());
    }
}

impl Request for ConsensusRequest {
    fn make_resource_path(&self) -> String {
        if self.if_modified_since_digests.is_empty() {
            format!("/tor/status-vote/current/consensus/{}", self.flavor)
        } else {
            format!(
                "/tor/status-vote/current/consensus/{}/{}",
                self.flavor,
                self.if_modified_since_digests.join("+")
            )
        }
    }
}

/// A request for a batch of microdescriptors, by SHA-256 digest.
#[derive(Clone, Debug)]
pub struct MicrodescRequest {
    /// The digests to fetch, base64-encoded (the form the directory
    /// protocol puts on the wire).
    digests: Vec<String>,
}

impl MicrodescRequest {
    /// Request the microdescriptors named by `digests`.
    pub fn new(digests: impl IntoIterator<Item = String>) -> Self {
        MicrodescRequest {
            digests: digests.into_iter().collect(),
        }
    }
}

impl Request for MicrodescRequest {
    fn make_resource_path(&self) -> String {
        format!("/tor/micro/d/{}", self.digests.join("-"))
    }
}

/// A request for one or more authority certificates, by signing-key
/// fingerprint.
#[derive(Clone, Debug)]
pub struct AuthCertRequest {
    /// The authority fingerprints to fetch certificates for.
    fingerprints: Vec<RsaIdentity>,
}

impl AuthCertRequest {
    /// Request certificates for the given authorities.
    pub fn new(fingerprints: impl IntoIterator<Item = RsaIdentity>) -> Self {
        AuthCertRequest {
            fingerprints: fingerprints.into_iter().collect(),
        }
    }
}

impl Request for AuthCertRequest {
    fn make_resource_path(&self) -> String {
        let fps: Vec<String> = self.fingerprints.iter().map(|fp| fp.to_string()).collect();
        format!("/tor/keys/fp/{}", fps.join("+"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn consensus_path_without_digests() {
        let req = ConsensusRequest::new("microdesc");
        assert_eq!(
            req.make_resource_path(),
            "/tor/status-vote/current/consensus/microdesc"
        );
    }

    #[test]
    fn microdesc_path_joins_digests() {
        let req = MicrodescRequest::new(vec!["AAAA".to_string(), "BBBB".to_string()]);
        assert_eq!(req.make_resource_path(), "/tor/micro/d/AAAA-BBBB");
    }
}
