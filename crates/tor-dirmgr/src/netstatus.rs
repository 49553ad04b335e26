//! A consensus, once it has been time- and signature-checked, and the
//! per-relay mutable state the cache tracks alongside it.

use std::collections::HashMap;
use std::time::SystemTime;

pub use tor_netdoc::doc::netstatus::{ConsensusFlavor, DocumentSignature, RouterStatus};
use tor_netdoc::doc::netstatus::UncheckedConsensus;
use tor_llcrypto::pk::rsa::RsaIdentity;

use crate::docid::MdDigest;

/// How long ago a consensus's `valid_until` may have passed and still
/// count as "reasonably live" for deciding whether to trust cache
/// expiry and client behavior that doesn't strictly require freshness.
pub const REASONABLY_LIVE_TIME: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// Default cap on download attempts for a single missing document
/// before the scheduler gives up (until something makes it worth
/// retrying, e.g. a new consensus).
pub const CONSENSUS_NETWORKSTATUS_MAX_DL_TRIES: u32 = 8;

/// Tracks how many times we've tried to download something, and when
/// we may try again.
#[derive(Clone, Debug, Default)]
pub struct DownloadStatus {
    /// Number of attempts made so far.
    n_attempts: u32,
    /// The earliest time a new attempt may be made. `None` means
    /// "immediately".
    next_attempt_at: Option<SystemTime>,
}

impl DownloadStatus {
    /// True if this item has already reached `cap` attempts without
    /// success.
    pub fn exhausted(&self, cap: u32) -> bool {
        self.n_attempts >= cap
    }

    /// True if it's time to try again, given `now`.
    pub fn ready_at(&self, now: SystemTime) -> bool {
        match self.next_attempt_at {
            Some(t) => now >= t,
            None => true,
        }
    }

    /// Record a failed attempt, backing off `delay` before the next
    /// one is allowed.
    pub fn note_failure(&mut self, now: SystemTime, delay: std::time::Duration) {
        self.n_attempts += 1;
        self.next_attempt_at = Some(now + delay);
    }

    /// Record a successful delivery: resets the attempt counter.
    pub fn note_success(&mut self) {
        self.n_attempts = 0;
        self.next_attempt_at = None;
    }
}

/// A checked consensus document plus the mutable per-relay state the
/// cache layers on top of it (routerstatus ordering is preserved from
/// parsing, which is already sorted by identity digest on the wire).
#[derive(Clone, Debug)]
pub struct CurrentConsensus {
    /// The checked document.
    consensus: UncheckedConsensus,
    /// Download status for each routerstatus's descriptor, keyed by
    /// identity. Only ever grows to cover relays actually seen.
    download_status: HashMap<RsaIdentity, DownloadStatus>,
}

impl CurrentConsensus {
    /// Wrap an already time/signature-checked consensus.
    pub fn new(consensus: UncheckedConsensus) -> Self {
        CurrentConsensus {
            consensus,
            download_status: HashMap::new(),
        }
    }

    /// Which flavor this consensus is.
    pub fn flavor(&self) -> ConsensusFlavor {
        self.consensus.flavor
    }

    /// Start of the validity window.
    pub fn valid_after(&self) -> SystemTime {
        self.consensus.valid_after
    }

    /// When this consensus stops being the freshest available.
    pub fn fresh_until(&self) -> SystemTime {
        self.consensus.fresh_until
    }

    /// End of the validity window.
    pub fn valid_until(&self) -> SystemTime {
        self.consensus.valid_until
    }

    /// True if `valid_until` is still in the future as of `now`.
    pub fn is_live(&self, now: SystemTime) -> bool {
        now < self.consensus.valid_until
    }

    /// True if `valid_until` plus [`REASONABLY_LIVE_TIME`] is still in
    /// the future as of `now`.
    pub fn is_reasonably_live(&self, now: SystemTime) -> bool {
        now < self.consensus.valid_until + REASONABLY_LIVE_TIME
    }

    /// Every routerstatus listed, in on-the-wire order.
    pub fn routerstatuses(&self) -> &[RouterStatus] {
        &self.consensus.routerstatuses
    }

    /// The signatures attached to this document.
    pub fn signatures(&self) -> &[DocumentSignature] {
        &self.consensus.signatures
    }

    /// The exact bytes that were signed.
    pub fn signed_text(&self) -> &str {
        &self.consensus.signed_text
    }

    /// Look up a clamped consensus parameter, falling back to
    /// `default` if absent or out of `[low, high]`.
    pub fn net_param(&self, name: &str, default: i32, low: i32, high: i32) -> i32 {
        self.consensus
            .net_params
            .get(name)
            .copied()
            .filter(|v| (low..=high).contains(v))
            .unwrap_or(default)
    }

    /// Look up a bandwidth-weight constant, defaulting to 0.
    pub fn weight_param(&self, name: &str) -> i32 {
        self.consensus.weight_params.get(name).copied().unwrap_or(0)
    }

    /// Every microdescriptor digest this consensus references.
    pub fn microdesc_digests(&self) -> impl Iterator<Item = &MdDigest> {
        self.consensus.routerstatuses.iter().filter_map(|rs| rs.microdesc_digest.as_ref())
    }

    /// Download status for `identity`'s referenced document, creating
    /// a fresh one if this is the first time we've looked.
    pub fn download_status_mut(&mut self, identity: RsaIdentity) -> &mut DownloadStatus {
        self.download_status.entry(identity).or_default()
    }

    /// Read-only lookup of `identity`'s download status, without
    /// creating an entry if none exists yet.
    pub fn download_status_for(&self, identity: RsaIdentity) -> Option<&DownloadStatus> {
        self.download_status.get(&identity)
    }

    /// Borrow the underlying unchecked document (for signature
    /// verification, which needs the raw signed bytes and signatures
    /// together with an authority registry it doesn't otherwise have
    /// access to).
    pub fn raw(&self) -> &UncheckedConsensus {
        &self.consensus
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn sample(valid_until: SystemTime) -> UncheckedConsensus {
        UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after: SystemTime::UNIX_EPOCH,
            fresh_until: SystemTime::UNIX_EPOCH + Duration::from_secs(3600),
            valid_until,
            routerstatuses: Vec::new(),
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: HashMap::new(),
            weight_params: HashMap::new(),
        }
    }

    #[test]
    fn liveness_windows() {
        let valid_until = SystemTime::UNIX_EPOCH + Duration::from_secs(7200);
        let cs = CurrentConsensus::new(sample(valid_until));
        assert!(cs.is_live(valid_until - Duration::from_secs(1)));
        assert!(!cs.is_live(valid_until + Duration::from_secs(1)));
        assert!(cs.is_reasonably_live(valid_until + REASONABLY_LIVE_TIME - Duration::from_secs(1)));
        assert!(!cs.is_reasonably_live(valid_until + REASONABLY_LIVE_TIME + Duration::from_secs(1)));
    }

    #[test]
    fn download_status_backs_off() {
        let mut status = DownloadStatus::default();
        let now = SystemTime::UNIX_EPOCH;
        assert!(status.ready_at(now));
        status.note_failure(now, Duration::from_secs(60));
        assert!(!status.ready_at(now));
        assert!(status.ready_at(now + Duration::from_secs(60)));
        status.note_success();
        assert_eq!(status.n_attempts, 0);
    }
}
