//! The cooperative event loop: drives fetch timing, hands downloaded
//! bytes to the right component, and fires the periodic maintenance
//! tick.

use std::collections::HashSet;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use retry_error::RetryError;
use tor_basic_utils::retry::RetryDelay;
use tor_dirclient::request::{AuthCertRequest, ConsensusRequest, MicrodescRequest, Request};
use tor_dirclient::{get_resource, DirResponse, DirectoryTransport};
use tor_netdoc::doc::netstatus::ConsensusFlavor;
use tor_rtcompat::Runtime;

use crate::consensus_store::SetCurrentFlags;
use crate::docid::{DocId, MdDigest};
use crate::err::{DirMgrError, Result};
use crate::mds::BodyLocation;
use crate::DirMgr;

/// How many times a single tick's downloads are retried before giving
/// up for that tick (later ticks will simply try again).
const MAX_ATTEMPTS_PER_TICK: u32 = 3;

impl<R: Runtime, T: DirectoryTransport> DirMgr<R, T> {
    /// Run one iteration of the cooperative event loop: fetch whatever
    /// is due, ingest whatever comes back, and recompute derived state.
    ///
    /// This is the only entry point that performs network I/O; callers
    /// drive it from their own timer, so every other method here stays
    /// synchronous and directly testable. `&mut self` is enough: this
    /// loop never runs two ticks concurrently against the same
    /// instance.
    pub async fn update(&mut self) -> Result<()> {
        let now = SystemTime::now();

        for flavor in [ConsensusFlavor::Ns, ConsensusFlavor::Microdesc] {
            self.maybe_fetch_consensus(flavor, now).await?;
        }
        if self.config.fetch_v2_networkstatus {
            debug!("v2 networkstatus fetch requested, but the v2 format is vestigial and unsupported");
        }
        // Only the microdesc-flavored consensus carries descriptor
        // digests; `ns` routerstatuses have nothing for NL to chase.
        self.maybe_fetch_missing_microdescs(now).await?;
        self.maybe_fetch_certs(now).await?;

        Ok(())
    }

    /// Fetch a fresh consensus of `flavor` if its fetch window has
    /// opened.
    async fn maybe_fetch_consensus(&mut self, flavor: ConsensusFlavor, now: SystemTime) -> Result<()> {
        if self.consensus_store.is_waiting_for_certs(flavor) {
            // The 20-minute deadline is enforced inside
            // `note_certs_arrived`; don't also re-fetch a fresh
            // consensus while one is parked waiting on certs.
            return Ok(());
        }
        let due_at = {
            let current = self.consensus_store.get_live(flavor, now);
            let mut rng = rand::thread_rng();
            crate::download::next_fetch_time(
                current,
                self.config.dir_cache,
                self.config.use_bridges,
                self.config.fetch_dir_info_extra_early,
                now,
                &mut rng,
            )
        };
        if now < due_at {
            return Ok(());
        }

        let request = ConsensusRequest::new(flavor.name());
        let response = match self.fetch_with_retry(&request, DocId::Consensus(flavor)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(flavor = flavor.name(), error = %e, "consensus fetch failed");
                return Ok(());
            }
        };

        let flags = SetCurrentFlags {
            require_flavor: Some(flavor),
            ..Default::default()
        };
        match self
            .consensus_store
            .set_current(response.body(), &self.authorities, now, flags)
        {
            Ok(outcome) => {
                debug!(flavor = flavor.name(), ?outcome, "processed fetched consensus");
            }
            Err(e) => {
                warn!(flavor = flavor.name(), error = %e, "rejected fetched consensus");
            }
        }
        Ok(())
    }

    /// Download every microdescriptor the current consensus references
    /// that we don't already have.
    async fn maybe_fetch_missing_microdescs(&mut self, now: SystemTime) -> Result<()> {
        let digests = {
            let Some(consensus) = self.consensus_store.get_reasonably_live(ConsensusFlavor::Microdesc, now) else {
                return Ok(());
            };
            crate::download::missing_microdescs(
                consensus,
                &self.mds,
                &mut self.md_download_status,
                &self.in_flight_mds,
                self.config.fetch_useless_descriptors,
                now,
            )
        };
        if digests.is_empty() {
            return Ok(());
        }

        self.in_flight_mds.extend(digests.iter().copied());

        let request = MicrodescRequest::new(digests.iter().map(hex::encode).collect::<Vec<_>>());
        let result = self.fetch_with_retry(&request, DocId::Microdesc(digests.clone())).await;

        for d in &digests {
            self.in_flight_mds.remove(d);
        }

        match result {
            Ok(response) => {
                let mut requested: HashSet<MdDigest> = digests.into_iter().collect();
                match self
                    .mds
                    .add_bytes(response.body(), BodyLocation::InJournal, false, Some(now), Some(&mut requested))
                {
                    Ok(added) => info!(n = added.len(), "ingested downloaded microdescriptors"),
                    Err(e) => warn!(error = %e, "failed to ingest downloaded microdescriptors"),
                }
                self.rebuild_node_table(now);
            }
            Err(e) => warn!(error = %e, "microdescriptor fetch failed"),
        }
        Ok(())
    }

    /// Fetch any authority certificates a waiting-for-certs consensus
    /// still needs.
    async fn maybe_fetch_certs(&mut self, now: SystemTime) -> Result<()> {
        let missing = self.consensus_store.missing_certs(&self.authorities);
        if missing.is_empty() {
            return Ok(());
        }

        let request = AuthCertRequest::new(missing.iter().map(|(identity, _)| *identity));
        match self.fetch_with_retry(&request, DocId::AuthCert(missing.clone())).await {
            Ok(response) => {
                let text = String::from_utf8_lossy(response.body()).into_owned();
                for block in split_authcert_blocks(&text) {
                    match tor_netdoc::doc::authcert::parse_authcert(block) {
                        Ok(cert) => match crate::sigcheck::AuthorityCert::try_from(cert) {
                            Ok(cert) => self.authorities.add_cert(cert),
                            Err(e) => warn!(error = %e, "downloaded authority cert was malformed"),
                        },
                        Err(e) => warn!(error = %e, "could not parse downloaded authority cert"),
                    }
                }
                self.consensus_store.note_certs_arrived(&self.authorities, now);
            }
            Err(e) => warn!(error = %e, "authority certificate fetch failed"),
        }
        Ok(())
    }

    /// Rebuild the node-linkage table from whatever consensus is
    /// currently live, now that new microdescriptors may have arrived,
    /// and reconcile the store's `held_by_nodes` counters against the
    /// delta the rebuild reports.
    pub(crate) fn rebuild_node_table(&mut self, now: SystemTime) {
        let Some(consensus) = self.consensus_store.get_reasonably_live(ConsensusFlavor::Microdesc, now) else {
            return;
        };
        // Borrow-split: `consensus` borrows `consensus_store`, and
        // `rebuild` only needs `mds`/`nodes`, both disjoint fields.
        let consensus = consensus.clone();
        let delta = self.nodes.rebuild(&consensus, &self.mds);
        for digest in &delta.released {
            self.mds.note_node_released(digest);
        }
        for digest in &delta.acquired {
            self.mds.note_node_acquired(digest);
        }
    }

    /// Run periodic maintenance: expire stale microdescriptors and
    /// compact the store if it's earned a rebuild. Meant to be called
    /// on a coarser cadence than [`DirMgr::update`].
    pub fn run_housekeeping(&mut self, now: SystemTime) -> Result<()> {
        let reasonably_live = self.consensus_store.any_reasonably_live(now);
        let cutoff = crate::mds::MicrodescStore::default_cutoff(now);
        self.mds.clean(cutoff, false, reasonably_live);
        self.mds.rebuild(false)?;
        Ok(())
    }

    /// Fetch `request`, retrying with exponential backoff up to
    /// [`MAX_ATTEMPTS_PER_TICK`] times. `id` names the document being
    /// fetched, for the retry-error message and per-attempt logging.
    async fn fetch_with_retry(&self, request: &dyn Request, id: DocId) -> Result<DirResponse> {
        let mut delay = RetryDelay::from_duration(std::time::Duration::from_secs(1));
        let description = id.describe();
        let mut errors = RetryError::in_attempt_to(description.clone());
        for attempt in 0..MAX_ATTEMPTS_PER_TICK {
            match get_resource(request, &self.transport).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    debug!(doc = %description, attempt = attempt + 1, error = %e, "fetch attempt failed");
                    errors.push(format!("attempt {}", attempt + 1), std::sync::Arc::new(DirMgrError::from(e)));
                    if attempt + 1 < MAX_ATTEMPTS_PER_TICK {
                        let wait = delay.next_delay(&mut rand::thread_rng());
                        self.runtime.sleep(wait).await;
                    }
                }
            }
        }
        errors.set_max_attempts(MAX_ATTEMPTS_PER_TICK as usize);
        Err(DirMgrError::AllFetchesFailed(errors))
    }
}

/// Split downloaded authority-certificate bytes on blank lines between
/// `-----END SIGNATURE-----` blocks, since the wire format concatenates
/// several certs with no other separator.
fn split_authcert_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let marker = "-----END SIGNATURE-----\n";
    while let Some(pos) = text[start..].find(marker) {
        let end = start + pos + marker.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.into_iter().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tor_dirclient::Error as DirClientError;
    use tor_rtmock::MockSleepRuntime;

    use crate::config::DirMgrConfig;

    /// A transport that fails its first `fail_times` calls, then always
    /// succeeds with `body`.
    struct FlakyTransport {
        fail_times: usize,
        attempts: AtomicUsize,
        body: Mutex<Vec<u8>>,
    }

    #[async_trait::async_trait]
    impl DirectoryTransport for FlakyTransport {
        async fn fetch(&self, _resource: &str) -> std::result::Result<DirResponse, DirClientError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(DirClientError::CouldNotConnect("simulated failure".into()));
            }
            Ok(DirResponse::new(200, None, self.body.lock().unwrap().clone()))
        }
    }

    fn mgr(rt: MockSleepRuntime, transport: FlakyTransport) -> DirMgr<MockSleepRuntime, FlakyTransport> {
        let dir = tempfile::TempDir::new().unwrap();
        // Leak the tempdir so the cache directory outlives this helper;
        // these tests never touch the filesystem, they only fetch.
        let path = dir.into_path();
        let config = DirMgrConfig::with_cache_dir(path).unwrap();
        DirMgr::new(config, rt, transport, std::iter::empty())
    }

    /// Drive `fut` to completion on `rt`'s virtual clock: a background
    /// thread repeatedly fast-forwards the clock so any pending
    /// `RetryDelay` sleep becomes ready almost immediately, without a
    /// real wall-clock wait.
    fn block_on_with_mock_clock<F: std::future::Future>(rt: &MockSleepRuntime, fut: F) -> F::Output {
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done2 = std::sync::Arc::clone(&done);
        let rt2 = rt.clone();
        let pump = std::thread::spawn(move || {
            while !done2.load(Ordering::SeqCst) {
                rt2.advance(std::time::Duration::from_secs(3600));
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        });
        let result = futures::executor::block_on(fut);
        done.store(true, Ordering::SeqCst);
        pump.join().expect("clock pump thread panicked");
        result
    }

    #[test]
    fn fetch_with_retry_succeeds_after_transient_failures() {
        let rt = MockSleepRuntime::new();
        let transport = FlakyTransport {
            fail_times: 2,
            attempts: AtomicUsize::new(0),
            body: Mutex::new(b"consensus bytes".to_vec()),
        };
        let dirmgr = mgr(rt.clone(), transport);
        let request = ConsensusRequest::new("microdesc");

        let result = block_on_with_mock_clock(
            &rt,
            dirmgr.fetch_with_retry(&request, DocId::Consensus(ConsensusFlavor::Microdesc)),
        );

        let response = result.expect("should eventually succeed within MAX_ATTEMPTS_PER_TICK");
        assert_eq!(response.body(), b"consensus bytes");
        assert_eq!(dirmgr.transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn fetch_with_retry_gives_up_after_max_attempts() {
        let rt = MockSleepRuntime::new();
        let transport = FlakyTransport {
            fail_times: usize::MAX,
            attempts: AtomicUsize::new(0),
            body: Mutex::new(Vec::new()),
        };
        let dirmgr = mgr(rt.clone(), transport);
        let request = ConsensusRequest::new("microdesc");

        let result = block_on_with_mock_clock(
            &rt,
            dirmgr.fetch_with_retry(&request, DocId::Consensus(ConsensusFlavor::Microdesc)),
        );

        assert!(result.is_err());
        assert_eq!(dirmgr.transport.attempts.load(Ordering::SeqCst), MAX_ATTEMPTS_PER_TICK as usize);
    }

    #[test]
    fn update_does_nothing_before_any_fetch_window_opens() {
        let rt = MockSleepRuntime::new();
        let transport = FlakyTransport {
            fail_times: usize::MAX,
            attempts: AtomicUsize::new(0),
            body: Mutex::new(Vec::new()),
        };
        let mut dirmgr = mgr(rt.clone(), transport);
        // With no consensus at all, `next_fetch_time` returns `now`, so
        // the very first tick always tries a consensus fetch; this only
        // checks that the tick runs to completion without panicking
        // when every fetch fails.
        block_on_with_mock_clock(&rt, dirmgr.update()).unwrap();
        assert!(dirmgr.transport.attempts.load(Ordering::SeqCst) > 0);
    }
}
