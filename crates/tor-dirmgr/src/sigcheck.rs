//! Quorum-of-authorities signature verification for consensus
//! documents.

use std::collections::{HashMap, HashSet};

use tor_llcrypto::pk::rsa::RsaIdentity;
use tor_netdoc::doc::netstatus::DocumentSignature;

use crate::netstatus::CurrentConsensus;

/// One directory authority we trust to sign consensuses.
#[derive(Clone, Debug)]
pub struct Authority {
    /// The authority's long-term identity-key digest.
    pub identity: RsaIdentity,
}

/// A certificate binding an authority's identity key to a (rotating)
/// signing key, as needed to check one of its signatures.
#[derive(Clone, Debug)]
pub struct AuthorityCert {
    /// The authority this cert belongs to.
    pub identity: RsaIdentity,
    /// The signing key it certifies.
    pub signing_key_digest: RsaIdentity,
    /// The DER-encoded signing key itself.
    pub signing_key: tor_llcrypto::pk::rsa::PublicKey,
}

impl TryFrom<tor_netdoc::doc::authcert::AuthCert> for AuthorityCert {
    type Error = crate::err::DirMgrError;

    fn try_from(cert: tor_netdoc::doc::authcert::AuthCert) -> Result<Self, Self::Error> {
        let signing_key = tor_llcrypto::pk::rsa::PublicKey::from_der(&cert.signing_key_der)
            .ok_or(crate::err::DirMgrError::ProtocolViolation("malformed authority signing key"))?;
        Ok(AuthorityCert {
            identity: cert.identity_key,
            signing_key_digest: cert.signing_key,
            signing_key,
        })
    }
}

/// The set of authorities and currently-known certs used to check
/// consensus signatures.
#[derive(Clone, Debug, Default)]
pub struct AuthorityRegistry {
    /// Every authority we recognize, by identity.
    authorities: HashMap<RsaIdentity, Authority>,
    /// Every certificate we currently hold, by (identity,
    /// signing-key-digest).
    certs: HashMap<(RsaIdentity, RsaIdentity), AuthorityCert>,
}

impl AuthorityRegistry {
    /// Construct a registry trusting exactly `authorities`.
    pub fn new(authorities: impl IntoIterator<Item = Authority>) -> Self {
        AuthorityRegistry {
            authorities: authorities.into_iter().map(|a| (a.identity, a)).collect(),
            certs: HashMap::new(),
        }
    }

    /// Number of recognized authorities.
    pub fn n_authorities(&self) -> usize {
        self.authorities.len()
    }

    /// The quorum size: a bare majority of recognized authorities.
    pub fn required(&self) -> usize {
        self.n_authorities() / 2 + 1
    }

    /// Record a freshly downloaded certificate.
    pub fn add_cert(&mut self, cert: AuthorityCert) {
        self.certs.insert((cert.identity, cert.signing_key_digest), cert);
    }

    /// Look up a certificate by (identity, signing-key-digest).
    fn cert(&self, identity: RsaIdentity, signing_key_digest: RsaIdentity) -> Option<&AuthorityCert> {
        self.certs.get(&(identity, signing_key_digest))
    }
}

/// The per-signature outcome of checking one authority's signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SigOutcome {
    /// The signature checked out.
    Good,
    /// We have the cert but the signature didn't verify.
    Bad,
    /// We don't recognize the signing identity at all.
    Unknown,
    /// We recognize the authority but lack the certificate for this
    /// signing key; it may be "stuck" if we've tried and failed to
    /// fetch it.
    MissingKey,
}

/// The overall result of classifying a consensus's signature set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureStatus {
    /// Signed by every recognized authority.
    FullySigned,
    /// Signed by at least a quorum: install it.
    SufficientlySigned,
    /// Not yet a quorum of good signatures, but enough good-or-missing
    /// that fetching the missing certs could get there.
    CouldBeWithCerts,
    /// Even with every missing cert, this can never reach a quorum.
    Unsignable,
}

/// The full result of [`classify`], including which certs are worth
/// fetching.
#[derive(Clone, Debug)]
pub struct Classification {
    /// The overall status.
    pub status: SignatureStatus,
    /// (identity, signing-key-digest) pairs we're missing a cert for,
    /// deduplicated.
    pub missing_certs: Vec<(RsaIdentity, RsaIdentity)>,
}

/// Classify `consensus`'s signatures against `registry`.
pub fn classify(consensus: &CurrentConsensus, registry: &AuthorityRegistry) -> Classification {
    let mut by_identity: HashMap<RsaIdentity, SigOutcome> = HashMap::new();
    let mut missing_certs = Vec::new();
    let mut missing_seen = HashSet::new();

    let signed_text = consensus.signed_text().as_bytes();
    for sig in consensus.signatures() {
        let outcome = classify_one(sig, signed_text, registry, &mut missing_certs, &mut missing_seen);
        let slot = by_identity.entry(sig.identity).or_insert(outcome);
        *slot = combine(*slot, outcome);
    }

    let good = by_identity.values().filter(|o| **o == SigOutcome::Good).count();
    let missing_key = by_identity.values().filter(|o| **o == SigOutcome::MissingKey).count();
    let n_auth = registry.n_authorities();
    let required = registry.required();

    let status = if good >= n_auth && n_auth > 0 {
        SignatureStatus::FullySigned
    } else if good >= required {
        SignatureStatus::SufficientlySigned
    } else if good + missing_key >= required {
        SignatureStatus::CouldBeWithCerts
    } else {
        SignatureStatus::Unsignable
    };

    Classification { status, missing_certs }
}

/// Classify a single signature, recording its (identity,
/// signing-key-digest) as missing-a-cert if we have no cert for it.
fn classify_one(
    sig: &DocumentSignature,
    signed_text: &[u8],
    registry: &AuthorityRegistry,
    missing_certs: &mut Vec<(RsaIdentity, RsaIdentity)>,
    missing_seen: &mut HashSet<(RsaIdentity, RsaIdentity)>,
) -> SigOutcome {
    use tor_llcrypto::pk::ValidatableSignature;

    if !registry.authorities.contains_key(&sig.identity) {
        return SigOutcome::Unknown;
    }
    let Some(cert) = registry.cert(sig.identity, sig.signing_key_digest) else {
        let key = (sig.identity, sig.signing_key_digest);
        if missing_seen.insert(key) {
            missing_certs.push(key);
        }
        return SigOutcome::MissingKey;
    };
    let digest: Vec<u8> = if sig.digest_algorithm == "sha256" {
        tor_llcrypto::d::digest_sha256(signed_text).to_vec()
    } else {
        tor_llcrypto::d::digest_sha1(signed_text).to_vec()
    };
    let validatable =
        tor_llcrypto::pk::rsa::ValidatableRsaSignature::new(cert.signing_key.clone(), &sig.signature, &digest);
    if validatable.is_valid() {
        SigOutcome::Good
    } else {
        SigOutcome::Bad
    }
}

/// Combine two outcomes seen for the same authority (an authority
/// should sign at most once, but if it somehow signed twice, good
/// beats everything, then bad, then missing-key, then unknown).
fn combine(a: SigOutcome, b: SigOutcome) -> SigOutcome {
    use SigOutcome::*;
    fn rank(o: SigOutcome) -> u8 {
        match o {
            Good => 0,
            Bad => 1,
            MissingKey => 2,
            Unknown => 3,
        }
    }
    if rank(a) <= rank(b) {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap as Map;
    use tor_netdoc::doc::netstatus::{ConsensusFlavor, UncheckedConsensus};

    fn identity(b: u8) -> RsaIdentity {
        RsaIdentity::from_bytes(&[b; 20]).unwrap()
    }

    fn consensus_with_sigs(sigs: Vec<DocumentSignature>) -> CurrentConsensus {
        CurrentConsensus::new(UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after: std::time::SystemTime::UNIX_EPOCH,
            fresh_until: std::time::SystemTime::UNIX_EPOCH,
            valid_until: std::time::SystemTime::UNIX_EPOCH,
            routerstatuses: Vec::new(),
            signatures: sigs,
            signed_text: String::new(),
            net_params: Map::new(),
            weight_params: Map::new(),
        })
    }

    fn sig(identity_byte: u8, signing_key_byte: u8) -> DocumentSignature {
        DocumentSignature {
            identity: identity(identity_byte),
            signing_key_digest: identity(signing_key_byte),
            signature: vec![1, 2, 3],
            digest_algorithm: "sha256".into(),
        }
    }

    #[test]
    fn five_authorities_no_certs_is_could_be_with_certs() {
        let registry = AuthorityRegistry::new((0..5).map(|i| Authority { identity: identity(i) }));
        let consensus = consensus_with_sigs((0..5).map(|i| sig(i, 100)).collect());
        let result = classify(&consensus, &registry);
        assert_eq!(result.status, SignatureStatus::CouldBeWithCerts);
        assert_eq!(result.missing_certs.len(), 5);
    }

    #[test]
    fn unrecognized_signer_does_not_count() {
        let registry = AuthorityRegistry::new((0..5).map(|i| Authority { identity: identity(i) }));
        let consensus = consensus_with_sigs(vec![sig(200, 100)]);
        let result = classify(&consensus, &registry);
        assert_eq!(result.status, SignatureStatus::Unsignable);
        assert!(result.missing_certs.is_empty());
    }

    #[test]
    fn zero_authorities_is_trivially_unsignable() {
        let registry = AuthorityRegistry::new(std::iter::empty());
        let consensus = consensus_with_sigs(Vec::new());
        let result = classify(&consensus, &registry);
        assert_eq!(result.status, SignatureStatus::Unsignable);
    }
}
