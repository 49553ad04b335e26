//! Microdescriptors: the per-relay summary that clients fetch instead
//! of a full router descriptor.

use tor_llcrypto::d::digest_sha256;
use tor_llcrypto::pk::ed25519::Ed25519Identity;

use crate::err::{Error, Pos, Result};
use crate::parse::items;

/// A single microdescriptor's SHA-256 digest, as used to name it in a
/// consensus and to key it in the cache.
pub type MdDigest = [u8; 32];

/// A parsed microdescriptor.
///
/// Fields that this cache never reads (like the full onion-key text)
/// are not parsed out; they remain part of the raw body that the
/// store keeps alongside this struct.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Microdesc {
    /// The relay's Ed25519 identity, if this microdescriptor declares
    /// one (`id ed25519 <base64>`).
    pub ed25519_id: Option<Ed25519Identity>,
    /// The relay's declared family members, by nickname or identity.
    pub family: Vec<String>,
    /// True if this relay's summarized exit policy accepts any
    /// traffic at all.
    pub exit_policy_nontrivial: bool,
}

/// One microdescriptor, together with the exact bytes it was parsed
/// from (needed to recompute its digest, or to write it back out
/// verbatim into the cache).
#[derive(Clone, Debug)]
pub struct ParsedMicrodesc {
    /// The digest of `self.text`.
    pub digest: MdDigest,
    /// The exact source bytes, from `onion-key` to (but not including)
    /// the next `onion-key` line or end of input.
    pub text: String,
    /// The parsed fields.
    pub microdesc: Microdesc,
}

/// Parse every microdescriptor in `text`, which may contain any number
/// of them concatenated together (as in `cached-microdescs`).
pub fn parse_microdescriptors(text: &str) -> Result<Vec<ParsedMicrodesc>> {
    let starts: Vec<usize> = text
        .match_indices("onion-key")
        .filter(|(i, _)| *i == 0 || text.as_bytes()[i - 1] == b'\n')
        .map(|(i, _)| i)
        .collect();

    if starts.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(text.len());
        let body = &text[start..end];
        let microdesc = parse_one(body)?;
        let digest = digest_sha256(body.as_bytes());
        out.push(ParsedMicrodesc {
            digest,
            text: body.to_string(),
            microdesc,
        });
    }
    Ok(out)
}

/// Parse the fields of a single microdescriptor's body.
fn parse_one(body: &str) -> Result<Microdesc> {
    let toks = items(body);
    if toks.first().map(|i| i.keyword) != Some("onion-key") {
        return Err(Error::MissingToken {
            keyword: "onion-key",
            pos: Pos::at_line(1),
        });
    }

    let mut ed25519_id = None;
    let mut family = Vec::new();
    let mut exit_policy_nontrivial = false;

    for item in &toks {
        match item.keyword {
            "id" if item.args.first() == Some(&"ed25519") => {
                let b64 = item.arg(1, "id")?;
                let decoded = {
                    use base64ct::Encoding;
                    base64ct::Base64Unpadded::decode_vec(b64).map_err(|e| Error::BadEncoding {
                        problem: e.to_string(),
                        pos: item.pos,
                    })?
                };
                ed25519_id = Ed25519Identity::from_bytes(&decoded);
            }
            "family" => {
                family = item.args.iter().map(|s| s.to_string()).collect();
            }
            "p" => {
                exit_policy_nontrivial = item.args.first() != Some(&"reject") || {
                    item.args.get(1).map(|s| *s != "1-65535").unwrap_or(true)
                };
            }
            _ => {}
        }
    }

    Ok(Microdesc {
        ed25519_id,
        family,
        exit_policy_nontrivial,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const TWO_MDS: &str = "onion-key\n\
-----BEGIN RSA PUBLIC KEY-----\n\
AAAA\n\
-----END RSA PUBLIC KEY-----\n\
family nodeA nodeB\n\
p accept 80,443\n\
onion-key\n\
-----BEGIN RSA PUBLIC KEY-----\n\
BBBB\n\
-----END RSA PUBLIC KEY-----\n\
p reject 1-65535\n";

    #[test]
    fn splits_on_onion_key_boundaries() {
        let parsed = parse_microdescriptors(TWO_MDS).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].microdesc.family, vec!["nodeA", "nodeB"]);
        assert!(parsed[0].microdesc.exit_policy_nontrivial);
        assert!(!parsed[1].microdesc.exit_policy_nontrivial);
    }

    #[test]
    fn digests_are_distinct() {
        let parsed = parse_microdescriptors(TWO_MDS).unwrap();
        assert_ne!(parsed[0].digest, parsed[1].digest);
    }
}
