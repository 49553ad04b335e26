//! Projects a consensus and the microdescriptor store into a table of
//! nodes keyed by relay identity.

use std::collections::HashMap;

use tor_llcrypto::pk::rsa::RsaIdentity;
use tor_netdoc::doc::netstatus::RouterStatus;

use crate::mds::MicrodescStore;
use crate::netstatus::CurrentConsensus;

/// One relay, as known from the current consensus and (if available)
/// its microdescriptor.
#[derive(Clone, Debug)]
pub struct Node {
    /// The consensus's routerstatus entry for this relay.
    pub routerstatus: RouterStatus,
    /// The digest of the microdescriptor this relay's routerstatus
    /// points at, if the consensus flavor carries one.
    pub md_digest: Option<[u8; 32]>,
}

impl Node {
    /// True if this relay's microdescriptor is present in `store`.
    pub fn has_microdesc(&self, store: &MicrodescStore) -> bool {
        self.md_digest.is_some_and(|d| store.lookup(&d).is_some())
    }
}

/// The node table: every relay in the current consensus, keyed by RSA
/// identity, resolved against whatever microdescriptors are on hand.
#[derive(Default)]
pub struct NodeTable {
    nodes: HashMap<RsaIdentity, Node>,
}

impl NodeTable {
    /// Construct an empty table.
    pub fn new() -> Self {
        NodeTable::default()
    }

    /// Number of relays currently known.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the table has no relays.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a relay by RSA identity.
    pub fn get(&self, identity: &RsaIdentity) -> Option<&Node> {
        self.nodes.get(identity)
    }

    /// Rebuild the table from `consensus`, releasing the md
    /// back-references the previous table held.
    ///
    /// `store` is only consulted through [`MicrodescStore::lookup`];
    /// this function does not mutate it. Callers are responsible for
    /// updating `held_by_nodes` counters on the store's entries to
    /// match the new table, since those counters exist purely as a
    /// consistency check and are not refcounts this function can own.
    pub fn rebuild(&mut self, consensus: &CurrentConsensus, store: &MicrodescStore) -> RebuildDelta {
        let mut released = Vec::new();
        for node in self.nodes.values() {
            if let Some(d) = node.md_digest {
                if store.lookup(&d).is_some() {
                    released.push(d);
                }
            }
        }

        let mut nodes = HashMap::new();
        let mut acquired = Vec::new();
        for rs in consensus.routerstatuses() {
            if let Some(d) = rs.microdesc_digest {
                if store.lookup(&d).is_some() {
                    acquired.push(d);
                }
            }
            nodes.insert(
                rs.rsa_identity,
                Node {
                    routerstatus: rs.clone(),
                    md_digest: rs.microdesc_digest,
                },
            );
        }

        self.nodes = nodes;
        RebuildDelta { released, acquired }
    }

    /// Remove every reference to `digest` from the table, as when the
    /// store is about to drop that entry. Returns the number of nodes
    /// that held it, for the caller to reconcile against
    /// `held_by_nodes`.
    pub fn clear_references_to(&mut self, digest: &[u8; 32]) -> u32 {
        let mut count = 0;
        for node in self.nodes.values_mut() {
            if node.md_digest.as_ref() == Some(digest) {
                node.md_digest = None;
                count += 1;
            }
        }
        count
    }
}

/// Which microdescriptor back-references changed as a result of a
/// [`NodeTable::rebuild`] call.
#[derive(Debug)]
pub struct RebuildDelta {
    /// Digests the old table referenced that the new table does not.
    pub released: Vec<[u8; 32]>,
    /// Digests the new table references.
    pub acquired: Vec<[u8; 32]>,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tor_netdoc::doc::netstatus::{ConsensusFlavor, UncheckedConsensus};

    fn consensus_with(rs: Vec<RouterStatus>) -> CurrentConsensus {
        CurrentConsensus::new(UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after: SystemTime::UNIX_EPOCH,
            fresh_until: SystemTime::UNIX_EPOCH + Duration::from_secs(3600),
            valid_until: SystemTime::UNIX_EPOCH + Duration::from_secs(7200),
            routerstatuses: rs,
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: std::collections::HashMap::new(),
            weight_params: std::collections::HashMap::new(),
        })
    }

    #[test]
    fn rebuild_tracks_identities() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MicrodescStore::new(dir.path());
        let identity = RsaIdentity::from([7; 20]);
        let rs = RouterStatus {
            nickname: "relay".into(),
            rsa_identity: identity,
            microdesc_digest: None,
            flags: Vec::new(),
        };
        let mut table = NodeTable::new();
        table.rebuild(&consensus_with(vec![rs]), &store);
        assert_eq!(table.len(), 1);
        assert!(table.get(&identity).is_some());
    }

    #[test]
    fn clear_references_drops_dangling_pointer() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MicrodescStore::new(dir.path());
        let identity = RsaIdentity::from([9; 20]);
        let digest = [1u8; 32];
        let rs = RouterStatus {
            nickname: "relay".into(),
            rsa_identity: identity,
            microdesc_digest: Some(digest),
            flags: Vec::new(),
        };
        let mut table = NodeTable::new();
        table.rebuild(&consensus_with(vec![rs]), &store);
        let cleared = table.clear_references_to(&digest);
        assert_eq!(cleared, 1);
        assert!(table.get(&identity).unwrap().md_digest.is_none());
    }
}
