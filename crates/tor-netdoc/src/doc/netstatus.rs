//! Consensus network-status documents.

use std::time::{Duration, SystemTime};

use tor_checkable::timed::{TimeValidityError, Timebound, TimerangeBound};
use tor_linkspec::RelayId;
use tor_llcrypto::pk::rsa::RsaIdentity;

use crate::doc::microdesc::MdDigest;
use crate::err::{Error, Pos, Result};
use crate::parse::{items, parse_timestamp};

/// Which variant of the consensus this is.
///
/// The cache keeps one current consensus per flavor; clients that only
/// need microdescriptors never have to look at the (much larger)
/// `ns` flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ConsensusFlavor {
    /// The "microdesc" flavor: routerstatus entries reference relays
    /// by microdescriptor digest.
    Microdesc,
    /// The "ns" flavor: routerstatus entries embed full router
    /// descriptor digests.
    Ns,
}

impl ConsensusFlavor {
    /// Return the name of this flavor as it appears in a consensus's
    /// `network-status-version` line and in cache filenames.
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusFlavor::Microdesc => "microdesc",
            ConsensusFlavor::Ns => "ns",
        }
    }

    /// Parse a flavor name, as found on the wire.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "microdesc" => Some(ConsensusFlavor::Microdesc),
            "ns" | "" => Some(ConsensusFlavor::Ns),
            _ => None,
        }
    }
}

/// A single relay's entry in a consensus.
#[derive(Clone, Debug)]
pub struct RouterStatus {
    /// The relay's nickname (informational only; never trust it for
    /// identity).
    pub nickname: String,
    /// The relay's RSA identity digest.
    pub rsa_identity: RsaIdentity,
    /// The microdescriptor digest this routerstatus refers to, if
    /// this is a microdesc-flavored consensus entry.
    pub microdesc_digest: Option<MdDigest>,
    /// Status flags assigned by the authorities (e.g. "Running",
    /// "Guard", "Exit").
    pub flags: Vec<String>,
}

impl RouterStatus {
    /// Return true if the routerstatus carries the named flag.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Return every known identity this routerstatus carries.
    pub fn identities(&self) -> Vec<RelayId> {
        vec![RelayId::Rsa(self.rsa_identity)]
    }

    /// Render this entry as a canonical routerstatus text line, the
    /// format the control-surface `ns/...` queries hand back.
    pub fn to_line(&self) -> String {
        let digest = self
            .microdesc_digest
            .map(|d| hex::encode(d))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "r {} {} {} {}",
            self.nickname,
            self.rsa_identity,
            digest,
            self.flags.join(" ")
        )
    }
}

/// A signature attached to a consensus by one authority.
#[derive(Clone, Debug)]
pub struct DocumentSignature {
    /// The signing authority's identity-key digest.
    pub identity: RsaIdentity,
    /// The digest of the authority's signing key itself (consensuses
    /// may be signed by a certificate whose signing key rotates
    /// independently of the long-term identity key).
    pub signing_key_digest: RsaIdentity,
    /// The raw signature bytes.
    pub signature: Vec<u8>,
    /// The digest algorithm the signature was computed over ("sha1" or
    /// "sha256").
    pub digest_algorithm: String,
}

/// A parsed, but not yet time- or signature-checked, consensus.
#[derive(Clone, Debug)]
pub struct UncheckedConsensus {
    /// Which flavor this is.
    pub flavor: ConsensusFlavor,
    /// The consensus method that produced this document.
    pub consensus_method: u32,
    /// Start of the validity window.
    pub valid_after: SystemTime,
    /// When clients should start looking for a replacement.
    pub fresh_until: SystemTime,
    /// End of the validity window.
    pub valid_until: SystemTime,
    /// Every relay listed in the consensus.
    pub routerstatuses: Vec<RouterStatus>,
    /// Every authority signature attached to the document.
    pub signatures: Vec<DocumentSignature>,
    /// The exact bytes of the signed portion (everything up to but not
    /// including `directory-signature`), needed to recompute each
    /// signature's digest.
    pub signed_text: String,
    /// Consensus-wide tunable parameters from the `params` line.
    pub net_params: std::collections::HashMap<String, i32>,
    /// Bandwidth-weighting constants from the `bandwidth-weights` line.
    pub weight_params: std::collections::HashMap<String, i32>,
}

impl UncheckedConsensus {
    /// Wrap this consensus in a time-bound so the caller must check
    /// `valid_after`/`valid_until` before using it.
    pub fn into_timebound(self) -> TimerangeBound<UncheckedConsensus> {
        let range = self.valid_after..self.valid_until;
        TimerangeBound::new(self, range)
    }
}

/// Parse a consensus document's text.
pub fn parse_consensus(text: &str) -> Result<UncheckedConsensus> {
    let toks = items(text);

    let mut flavor = ConsensusFlavor::Ns;
    let mut consensus_method = 0_u32;
    let mut valid_after = None;
    let mut fresh_until = None;
    let mut valid_until = None;
    let mut routerstatuses = Vec::new();
    let mut signatures = Vec::new();
    let mut current: Option<RouterStatus> = None;
    let mut net_params = std::collections::HashMap::new();
    let mut weight_params = std::collections::HashMap::new();

    let sig_start = text.find("\ndirectory-signature ").map(|i| i + 1);
    let signed_text = match sig_start {
        Some(i) => text[..i].to_string(),
        None => text.to_string(),
    };

    for item in &toks {
        match item.keyword {
            "network-status-version" => {
                if let Some(name) = item.args.get(1) {
                    flavor = ConsensusFlavor::from_name(name).ok_or_else(|| Error::BadArgument {
                        keyword: "network-status-version",
                        problem: format!("unrecognized flavor {name:?}"),
                        pos: item.pos,
                    })?;
                }
            }
            "consensus-method" => {
                consensus_method = parse_u32(item.arg(0, "consensus-method")?, item.pos)?;
            }
            "valid-after" => valid_after = Some(parse_timestamp(item, "valid-after")?),
            "fresh-until" => fresh_until = Some(parse_timestamp(item, "fresh-until")?),
            "valid-until" => valid_until = Some(parse_timestamp(item, "valid-until")?),
            "r" => {
                if let Some(rs) = current.take() {
                    routerstatuses.push(rs);
                }
                let nickname = item.arg(0, "r")?.to_string();
                let ident_b64 = item.arg(1, "r")?;
                let rsa_identity = decode_rsa_identity(ident_b64, item.pos)?;
                current = Some(RouterStatus {
                    nickname,
                    rsa_identity,
                    microdesc_digest: None,
                    flags: Vec::new(),
                });
            }
            "m" => {
                if let Some(rs) = current.as_mut() {
                    let b64 = item.arg(0, "m")?;
                    use base64ct::Encoding;
                    let decoded =
                        base64ct::Base64Unpadded::decode_vec(b64).map_err(|e| Error::BadEncoding {
                            problem: e.to_string(),
                            pos: item.pos,
                        })?;
                    rs.microdesc_digest = decoded.try_into().ok();
                }
            }
            "s" => {
                if let Some(rs) = current.as_mut() {
                    rs.flags = item.args.iter().map(|s| s.to_string()).collect();
                }
            }
            "directory-signature" => {
                signatures.push(parse_signature(item, text)?);
            }
            "params" => {
                net_params = parse_kv_params(item);
            }
            "bandwidth-weights" => {
                weight_params = parse_kv_params(item);
            }
            _ => {}
        }
    }
    if let Some(rs) = current.take() {
        routerstatuses.push(rs);
    }

    Ok(UncheckedConsensus {
        flavor,
        consensus_method,
        valid_after: valid_after.ok_or(Error::MissingToken {
            keyword: "valid-after",
            pos: Pos::none(),
        })?,
        fresh_until: fresh_until.ok_or(Error::MissingToken {
            keyword: "fresh-until",
            pos: Pos::none(),
        })?,
        valid_until: valid_until.ok_or(Error::MissingToken {
            keyword: "valid-until",
            pos: Pos::none(),
        })?,
        routerstatuses,
        signatures,
        signed_text,
        net_params,
        weight_params,
    })
}

/// Parse a line of `key=value` pairs (as used by `params` and
/// `bandwidth-weights`), ignoring any that don't parse as an `i32`.
fn parse_kv_params(item: &crate::parse::Item<'_>) -> std::collections::HashMap<String, i32> {
    item.args
        .iter()
        .filter_map(|arg| {
            let (k, v) = arg.split_once('=')?;
            Some((k.to_string(), v.parse().ok()?))
        })
        .collect()
}

/// Parse a `directory-signature` line: either
/// `directory-signature <digest-alg> <identity> <signing-key-digest>`
/// or the legacy two-argument form (implicitly sha1).
fn parse_signature(item: &crate::parse::Item<'_>, text: &str) -> Result<DocumentSignature> {
    let (digest_algorithm, identity_hex, signing_key_hex) = if item.args.len() >= 3 {
        (item.args[0].to_string(), item.args[1], item.args[2])
    } else {
        ("sha1".to_string(), item.arg(0, "directory-signature")?, item.arg(1, "directory-signature")?)
    };
    let identity = RsaIdentity::from_hex(identity_hex).ok_or_else(|| Error::BadArgument {
        keyword: "directory-signature",
        problem: "bad identity fingerprint".into(),
        pos: item.pos,
    })?;
    let signing_key_digest = RsaIdentity::from_hex(signing_key_hex).ok_or_else(|| Error::BadArgument {
        keyword: "directory-signature",
        problem: "bad signing-key digest".into(),
        pos: item.pos,
    })?;
    let after_line = item.pos.line;
    let signature = crate::parse::take_object(text, after_line)?;
    Ok(DocumentSignature {
        identity,
        signing_key_digest,
        signature,
        digest_algorithm,
    })
}

/// Decode an RSA identity from the base64 form used in `r` lines.
fn decode_rsa_identity(b64: &str, pos: Pos) -> Result<RsaIdentity> {
    use base64ct::Encoding;
    let decoded = base64ct::Base64Unpadded::decode_vec(b64).map_err(|e| Error::BadEncoding {
        problem: e.to_string(),
        pos,
    })?;
    RsaIdentity::from_bytes(&decoded).ok_or_else(|| Error::BadArgument {
        keyword: "r",
        problem: "identity digest was not 20 bytes".into(),
        pos,
    })
}

/// Parse a plain decimal integer argument.
fn parse_u32(s: &str, pos: Pos) -> Result<u32> {
    s.parse().map_err(|_| Error::BadArgument {
        keyword: "consensus-method",
        problem: format!("{s:?} is not a number"),
        pos,
    })
}

/// Treat a [`TimeValidityError`] as what it is to a directory cache: a
/// reason the document must go into the SV's `could_be_with_certs`
/// handling, not a parse failure.
pub fn is_clock_skew(_e: &TimeValidityError) -> bool {
    true
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "network-status-version 3 microdesc\n\
consensus-method 28\n\
valid-after 2023-01-01 00:00:00\n\
fresh-until 2023-01-01 01:00:00\n\
valid-until 2023-01-01 03:00:00\n\
r Unnamed AAAAAAAAAAAAAAAAAAAAAAAAAAA 2023-01-01 00:00:00 1.2.3.4 9001 0\n\
m AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\n\
s Fast Guard Running Stable V2Dir Valid\n\
directory-signature sha256 AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB\n\
-----BEGIN SIGNATURE-----\n\
AAAA\n\
-----END SIGNATURE-----\n";

    #[test]
    fn parses_basic_fields() {
        let c = parse_consensus(SAMPLE).unwrap();
        assert_eq!(c.flavor, ConsensusFlavor::Microdesc);
        assert_eq!(c.consensus_method, 28);
        assert_eq!(c.routerstatuses.len(), 1);
        assert!(c.routerstatuses[0].has_flag("Guard"));
        assert_eq!(c.signatures.len(), 1);
    }
}
