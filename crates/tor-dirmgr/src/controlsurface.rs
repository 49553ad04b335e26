//! Read-only lookups exposed to a controller, matching the `ns/...`
//! GETINFO namespace.

use tor_netdoc::doc::netstatus::{ConsensusFlavor, RouterStatus};

use crate::netstatus::CurrentConsensus;

/// Answer one `ns/...` style query against `consensus`.
#[derive(Clone, Copy, Debug)]
pub enum NsQuery<'a> {
    /// `ns/all`: every routerstatus in the consensus.
    All,
    /// `ns/id/<hex fingerprint>`.
    Id(&'a str),
    /// `ns/name/<nickname>`.
    Name(&'a str),
    /// `ns/purpose/<purpose>`: not supported without a bridge/purpose
    /// database, so this always reports empty.
    Purpose(&'a str),
}

impl<'a> NsQuery<'a> {
    /// Run this query against `consensus` of the given `flavor`,
    /// returning each matching entry's canonical routerstatus line.
    pub fn run(&self, flavor: ConsensusFlavor, consensus: Option<&CurrentConsensus>) -> Vec<String> {
        let Some(consensus) = consensus.filter(|c| c.flavor() == flavor) else {
            return Vec::new();
        };
        let matches: Vec<&RouterStatus> = match self {
            NsQuery::All => consensus.routerstatuses().iter().collect(),
            NsQuery::Id(hex) => {
                let Some(wanted) = tor_llcrypto::pk::rsa::RsaIdentity::from_hex(hex) else {
                    return Vec::new();
                };
                consensus
                    .routerstatuses()
                    .iter()
                    .filter(|rs| rs.rsa_identity == wanted)
                    .collect()
            }
            NsQuery::Name(name) => consensus
                .routerstatuses()
                .iter()
                .filter(|rs| rs.nickname == *name)
                .collect(),
            NsQuery::Purpose(_) => Vec::new(),
        };
        matches.into_iter().map(RouterStatus::to_line).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, SystemTime};
    use tor_netdoc::doc::netstatus::UncheckedConsensus;

    fn consensus() -> CurrentConsensus {
        let identity = tor_llcrypto::pk::rsa::RsaIdentity::from([3; 20]);
        let rs = RouterStatus {
            nickname: "relay".into(),
            rsa_identity: identity,
            microdesc_digest: None,
            flags: Vec::new(),
        };
        CurrentConsensus::new(UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after: SystemTime::UNIX_EPOCH,
            fresh_until: SystemTime::UNIX_EPOCH + Duration::from_secs(3600),
            valid_until: SystemTime::UNIX_EPOCH + Duration::from_secs(7200),
            routerstatuses: vec![rs],
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: HashMap::new(),
            weight_params: HashMap::new(),
        })
    }

    #[test]
    fn ns_all_returns_every_relay() {
        let c = consensus();
        let result = NsQuery::All.run(ConsensusFlavor::Microdesc, Some(&c));
        assert_eq!(result.len(), 1);
        assert!(result[0].starts_with("r relay "));
    }

    #[test]
    fn ns_by_name_filters() {
        let c = consensus();
        let result = NsQuery::Name("relay").run(ConsensusFlavor::Microdesc, Some(&c));
        assert_eq!(result.len(), 1);
        let miss = NsQuery::Name("other").run(ConsensusFlavor::Microdesc, Some(&c));
        assert!(miss.is_empty());
    }

    #[test]
    fn wrong_flavor_returns_nothing() {
        let c = consensus();
        let result = NsQuery::All.run(ConsensusFlavor::Ns, Some(&c));
        assert!(result.is_empty());
    }
}
