//! Acquire, validate, and cache Tor directory documents.
//!
//! This crate is the directory cache core of a Tor-like client or
//! relay: it decides when to fetch a consensus or a microdescriptor,
//! validates what comes back against a quorum of directory
//! authorities, and keeps the result in a disk-backed store that
//! survives restarts without re-verifying everything from scratch.
//!
//! The pieces are deliberately kept separate so each can be tested on
//! its own:
//!
//! - [`mds`] is the microdescriptor store: an append-only journal over
//!   an mmapped main file, compacted on demand.
//! - [`netstatus`] and [`consensus_store`] hold the current consensus
//!   per flavor, including the "waiting for certs" parked state.
//! - [`sigcheck`] classifies a consensus's signatures against a
//!   [`sigcheck::AuthorityRegistry`].
//! - [`download`] computes fetch windows and missing-document sets.
//! - [`nodelinkage`] tracks which relay identities currently have a
//!   microdescriptor, for leak detection.
//! - [`bootstrap`] is the event loop that ties the above together and
//!   is the only module that touches the network.
//!
//! [`DirMgr`] itself holds every component as a plain field, mutated
//! through `&mut self`: this crate is a single-threaded cooperative
//! event loop, not a shared, internally-locked service. A caller that
//! wants to share one `DirMgr` across tasks is expected to put it
//! behind its own `Arc<Mutex<_>>` (or run it on one task and talk to it
//! over a channel); the `Runtime: Send + Sync` bound below exists only
//! so the loop's own future can be spawned, not because this type
//! tolerates concurrent mutation.
//!
//! Building circuits to fetch things over, and the cryptographic
//! primitives signatures are checked with, are out of scope: they're
//! the seams [`tor_dirclient::DirectoryTransport`] and
//! `tor_llcrypto` exist to fill from outside this crate.

#![allow(clippy::exhaustive_structs)]
#![allow(clippy::exhaustive_enums)]

pub mod bootstrap;
pub mod config;
pub mod consensus_store;
pub mod controlsurface;
pub mod docid;
pub mod download;
pub mod err;
pub mod event;
pub mod mds;
pub mod microdesc;
pub mod netstatus;
pub mod nodelinkage;
pub mod sigcheck;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use tor_dirclient::DirectoryTransport;
use tor_netdoc::doc::netstatus::ConsensusFlavor;
use tor_rtcompat::Runtime;

pub use config::DirMgrConfig;
pub use err::{DirMgrError, Result};
pub use event::{DirEvent, DirEventListener, DirEventPublisher};

use consensus_store::{ConsensusStore, SetCurrentFlags};
use controlsurface::NsQuery;
use docid::MdDigest;
use mds::MicrodescStore;
use netstatus::{CurrentConsensus, DownloadStatus};
use nodelinkage::NodeTable;
use sigcheck::{Authority, AuthorityRegistry};

/// The directory cache core: owns the on-disk microdescriptor store,
/// the current consensus per flavor, the authority/cert registry, and
/// the derived node-linkage table.
pub struct DirMgr<R: Runtime, T: DirectoryTransport> {
    /// This instance's configuration.
    config: DirMgrConfig,
    /// The runtime used for sleeping between retries.
    runtime: R,
    /// How we actually reach the network.
    transport: T,
    /// The microdescriptor store.
    mds: MicrodescStore,
    /// The current consensus per flavor.
    consensus_store: ConsensusStore,
    /// Trusted authorities and the certs we hold for them.
    authorities: AuthorityRegistry,
    /// The derived relay-identity-to-microdescriptor table.
    nodes: NodeTable,
    /// Per-digest retry state for in-progress microdescriptor fetches.
    md_download_status: HashMap<MdDigest, DownloadStatus>,
    /// Digests currently being fetched, so two ticks don't double-request.
    in_flight_mds: HashSet<MdDigest>,
    /// Lifecycle events for controllers to subscribe to. Kept behind an
    /// `Arc` since it's a broadcast primitive meant to be shared with
    /// listeners that outlive any single borrow of `self`, not a
    /// channel for mutating `DirMgr`'s own state.
    events: Arc<DirEventPublisher>,
}

impl<R: Runtime, T: DirectoryTransport> DirMgr<R, T> {
    /// Construct a new, empty `DirMgr` backed by `config.cache_dir`,
    /// trusting `authorities` to sign consensuses.
    ///
    /// This does not load anything from disk; call [`DirMgr::reload`]
    /// to populate the microdescriptor store from an existing cache.
    pub fn new(config: DirMgrConfig, runtime: R, transport: T, authorities: impl IntoIterator<Item = Authority>) -> Self {
        let events = DirEventPublisher::new();
        DirMgr {
            mds: MicrodescStore::new(&config.cache_dir),
            consensus_store: ConsensusStore::new(&config.cache_dir, Arc::clone(&events)),
            authorities: AuthorityRegistry::new(authorities),
            nodes: NodeTable::new(),
            md_download_status: HashMap::new(),
            in_flight_mds: HashSet::new(),
            events,
            config,
            runtime,
            transport,
        }
    }

    /// The consensus flavor this instance treats as primary for
    /// node-linkage and control-surface purposes, per
    /// `use_microdescriptors`. Both flavors are still fetched and
    /// installed by [`DirMgr::update`] regardless of this setting.
    fn primary_flavor(&self) -> ConsensusFlavor {
        if self.config.use_microdescriptors {
            ConsensusFlavor::Microdesc
        } else {
            ConsensusFlavor::Ns
        }
    }

    /// Load whatever's already on disk in `config.cache_dir` — the
    /// microdescriptor store, any persisted `cached-<flavor>-consensus`/
    /// `unverified-<flavor>` files, and a configured fallback
    /// networkstatus file if nothing newer is already cached — and
    /// rebuild the node-linkage table from it if a consensus is
    /// available. Safe to call on a freshly constructed `DirMgr` before
    /// the first [`DirMgr::update`].
    pub fn reload(&mut self) -> Result<()> {
        self.mds.reload()?;
        let now = std::time::SystemTime::now();

        self.consensus_store.load_from_disk(&self.authorities, now)?;

        if let Some(path) = self.config.fallback_networkstatus_file.clone() {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let flags = SetCurrentFlags {
                        from_cache: true,
                        accept_obsolete: true,
                        ..Default::default()
                    };
                    match self.consensus_store.set_current(&bytes, &self.authorities, now, flags) {
                        Ok(outcome) => debug!(?outcome, "loaded fallback networkstatus file"),
                        Err(e) => warn!(error = %e, "fallback networkstatus file was unusable"),
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not read fallback networkstatus file"),
            }
        }

        self.rebuild_node_table(now);
        Ok(())
    }

    /// Subscribe to lifecycle events (`NEWCONSENSUS`, `CONSENSUS_ARRIVED`,
    /// `CLOCK_SKEW`).
    pub fn subscribe(&self) -> DirEventListener {
        self.events.subscribe()
    }

    /// Answer a control-surface `ns/...` query against the primary
    /// flavor's current consensus (see [`DirMgr::primary_flavor`]),
    /// returning canonical routerstatus text lines.
    pub fn ns_query(&self, query: NsQuery<'_>) -> Vec<String> {
        let flavor = self.primary_flavor();
        let now = std::time::SystemTime::now();
        let consensus = self.consensus_store.get_live(flavor, now);
        query.run(flavor, consensus)
    }

    /// True if we have a usable (reasonably live) consensus for the
    /// primary flavor and every microdescriptor it lists (when that
    /// flavor is microdesc-based). A controller can use this to decide
    /// whether it's safe to build circuits yet.
    pub fn is_bootstrapped(&self) -> bool {
        let now = std::time::SystemTime::now();
        let flavor = self.primary_flavor();
        let Some(consensus) = self.consensus_store.get_reasonably_live(flavor, now) else {
            return false;
        };
        if flavor != ConsensusFlavor::Microdesc {
            return true;
        }
        consensus
            .microdesc_digests()
            .all(|d| d.iter().all(|b| *b == 0) || self.mds.lookup(d).is_some())
    }

    /// Return the currently installed consensus of `flavor`, cloned out
    /// of the store, if one is live.
    pub fn current_consensus(&self, flavor: ConsensusFlavor) -> Option<CurrentConsensus> {
        let now = std::time::SystemTime::now();
        self.consensus_store.get_live(flavor, now).cloned()
    }

    /// Number of microdescriptors currently cached, for diagnostics.
    pub fn n_microdescs(&self) -> usize {
        self.mds.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tor_dirclient::{DirResponse, Error as DirClientError};
    use tor_rtmock::MockSleepRuntime;

    /// A transport that always fails, for exercising construction and
    /// the synchronous query paths without any real network.
    #[derive(Clone)]
    struct NullTransport;

    #[async_trait::async_trait]
    impl DirectoryTransport for NullTransport {
        async fn fetch(&self, _resource: &str) -> std::result::Result<DirResponse, DirClientError> {
            Err(DirClientError::CouldNotConnect("no transport in this test".into()))
        }
    }

    fn mgr(dir: &std::path::Path) -> DirMgr<MockSleepRuntime, NullTransport> {
        let rt = MockSleepRuntime::new();
        let config = DirMgrConfig::with_cache_dir(dir).unwrap();
        DirMgr::new(config, rt, NullTransport, std::iter::empty())
    }

    #[test]
    fn fresh_instance_is_not_bootstrapped() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = mgr(dir.path());
        assert!(!m.is_bootstrapped());
        assert_eq!(m.n_microdescs(), 0);
    }

    #[test]
    fn reload_on_empty_cache_dir_is_a_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut m = mgr(dir.path());
        m.reload().unwrap();
        assert_eq!(m.n_microdescs(), 0);
    }

    #[test]
    fn ns_query_against_no_consensus_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = mgr(dir.path());
        assert!(m.ns_query(NsQuery::All).is_empty());
    }

    #[test]
    fn primary_flavor_follows_use_microdescriptors() {
        let dir = tempfile::TempDir::new().unwrap();
        let rt = MockSleepRuntime::new();
        let config = DirMgrConfig::builder()
            .cache_dir(dir.path())
            .use_microdescriptors(false)
            .build()
            .unwrap();
        let m = DirMgr::new(config, rt, NullTransport, std::iter::empty());
        assert_eq!(m.primary_flavor(), ConsensusFlavor::Ns);
    }

    #[test]
    fn reload_reports_unreadable_fallback_file_without_failing() {
        let dir = tempfile::TempDir::new().unwrap();
        let rt = MockSleepRuntime::new();
        let config = DirMgrConfig::builder()
            .cache_dir(dir.path())
            .fallback_networkstatus_file(dir.path().join("does-not-exist"))
            .build()
            .unwrap();
        let mut m = DirMgr::new(config, rt, NullTransport, std::iter::empty());
        // A missing fallback file is logged, not a hard error.
        m.reload().unwrap();
    }
}
