//! Directory authority certificates.
//!
//! Each authority periodically rotates its signing key; a certificate
//! binds a signing key to the authority's long-term identity key for a
//! validity window, so the cache can keep validating consensus
//! signatures without re-fetching the identity key.

use std::time::SystemTime;

use tor_checkable::timed::TimerangeBound;
use tor_llcrypto::pk::rsa::{PublicKey, RsaIdentity};

use crate::err::{Error, Pos, Result};
use crate::parse::{items, parse_timestamp, take_object};

/// A parsed authority certificate, not yet checked against its
/// validity window.
#[derive(Clone, Debug)]
pub struct AuthCert {
    /// The authority's long-term identity-key fingerprint.
    pub identity_key: RsaIdentity,
    /// The fingerprint of the signing key this certificate binds to
    /// `identity_key`.
    pub signing_key: RsaIdentity,
    /// Start of the certificate's validity window.
    pub published: SystemTime,
    /// End of the certificate's validity window.
    pub expires: SystemTime,
    /// The DER encoding of the signing key itself.
    pub signing_key_der: Vec<u8>,
}

impl AuthCert {
    /// Wrap this certificate in a time-bound.
    pub fn into_timebound(self) -> TimerangeBound<AuthCert> {
        let range = self.published..self.expires;
        TimerangeBound::new(self, range)
    }
}

/// Parse a single authority certificate.
pub fn parse_authcert(text: &str) -> Result<AuthCert> {
    let toks = items(text);
    let mut identity_key = None;
    let mut signing_key_der = None;
    let mut published = None;
    let mut expires = None;

    for item in &toks {
        match item.keyword {
            "fingerprint" => {
                identity_key = Some(
                    RsaIdentity::from_hex(item.arg(0, "fingerprint")?).ok_or_else(|| {
                        Error::BadArgument {
                            keyword: "fingerprint",
                            problem: "bad hex fingerprint".into(),
                            pos: item.pos,
                        }
                    })?,
                );
            }
            "dir-signing-key" => {
                signing_key_der = Some(take_object(text, item.pos.line)?);
            }
            "dir-key-certificate-version" => {}
            "dir-key-published" => {
                published = Some(parse_timestamp(item, "dir-key-published")?);
            }
            "dir-key-expires" => {
                expires = Some(parse_timestamp(item, "dir-key-expires")?);
            }
            _ => {}
        }
    }

    let signing_key_der = signing_key_der.ok_or(Error::MissingToken {
        keyword: "dir-signing-key",
        pos: Pos::none(),
    })?;

    Ok(AuthCert {
        identity_key: identity_key.ok_or(Error::MissingToken {
            keyword: "fingerprint",
            pos: Pos::none(),
        })?,
        signing_key: PublicKey::from_der(&signing_key_der)
            .ok_or(Error::BadEncoding {
                problem: "dir-signing-key was not a valid PEM object".into(),
                pos: Pos::none(),
            })?
            .to_rsa_identity(),
        published: published.ok_or(Error::MissingToken {
            keyword: "dir-key-published",
            pos: Pos::none(),
        })?,
        expires: expires.ok_or(Error::MissingToken {
            keyword: "dir-key-expires",
            pos: Pos::none(),
        })?,
        signing_key_der,
    })
}
