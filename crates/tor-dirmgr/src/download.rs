//! Fetch timing and missing-document tracking.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::docid::MdDigest;
use crate::mds::MicrodescStore;
use crate::netstatus::{CurrentConsensus, DownloadStatus, CONSENSUS_NETWORKSTATUS_MAX_DL_TRIES};

/// Cap on a single consensus fetch attempt's backoff window, below
/// which the dir-cache-early and ordinary-client windows are both
/// computed relative to `fresh_until`/`valid_until` rather than this
/// constant directly.
const MAX_MIN_SLOP: Duration = Duration::from_secs(120);

/// Compute the window `(start, window_len)` during which a client (not
/// a directory cache) should fetch the next consensus, given the
/// interval between `valid_after` and `fresh_until`.
///
/// Per the design, an ordinary client waits until three-quarters of
/// the way through the freshness interval, then picks a uniformly
/// random instant within the remaining seven-eighths of the interval
/// up to `valid_until`.
pub fn client_fetch_window(consensus: &CurrentConsensus) -> (SystemTime, Duration) {
    let valid_after = consensus.valid_after();
    let fresh_until = consensus.fresh_until();
    let valid_until = consensus.valid_until();
    let interval = fresh_until
        .duration_since(valid_after)
        .unwrap_or(Duration::from_secs(0));

    let start = fresh_until + interval / 4 * 3;
    let remaining = valid_until.duration_since(start).unwrap_or(Duration::from_secs(0));
    let window = remaining / 8 * 7;
    (start, window)
}

/// `min_slop = min(120 s, interval/16)`, shared by the cache window and
/// the bridge shift below.
fn min_slop(interval: Duration) -> Duration {
    interval.checked_div(16).unwrap_or(Duration::ZERO).min(MAX_MIN_SLOP)
}

/// The dir-cache variant of [`client_fetch_window`]: caches fetch
/// earlier, right after the minimum caching delay, and spread their
/// attempts over half the freshness interval so as not to all hit the
/// authorities at once. `extra_early` (directory authorities, or a
/// client configured to fetch extra early) caps the window at 60 s
/// instead of using the usual half-interval spread.
pub fn cache_fetch_window(consensus: &CurrentConsensus, extra_early: bool) -> (SystemTime, Duration) {
    let valid_after = consensus.valid_after();
    let fresh_until = consensus.fresh_until();
    let interval = fresh_until
        .duration_since(valid_after)
        .unwrap_or(Duration::from_secs(0));
    let min_slop = min_slop(interval);

    let start = fresh_until + min_slop;
    let window = if extra_early {
        Duration::from_secs(60)
    } else {
        interval / 2
    };
    let window = window.min(interval.saturating_sub(min_slop));
    (start, window)
}

/// Pick the next fetch time for `consensus`, drawing uniformly within
/// its window. A bridge client shifts the window further out still, to
/// avoid being the first to ask (and so stand out).
pub fn next_fetch_time(
    consensus: Option<&CurrentConsensus>,
    is_cache: bool,
    is_bridge: bool,
    extra_early: bool,
    now: SystemTime,
    rng: &mut impl Rng,
) -> SystemTime {
    let Some(consensus) = consensus else {
        // No live consensus at all: there's nothing to wait on.
        return now;
    };
    let (mut start, mut window) = if is_cache {
        cache_fetch_window(consensus, extra_early)
    } else {
        client_fetch_window(consensus)
    };
    if is_bridge {
        let interval = consensus
            .fresh_until()
            .duration_since(consensus.valid_after())
            .unwrap_or(Duration::from_secs(0));
        let slop = min_slop(interval);
        start += window + slop;
        window = consensus
            .valid_until()
            .duration_since(start)
            .unwrap_or(Duration::ZERO)
            .saturating_sub(slop);
    }
    let offset_ms = if window.is_zero() {
        0
    } else {
        rng.gen_range(0..=window.as_millis().min(u128::from(u64::MAX)) as u64)
    };
    start + Duration::from_millis(offset_ms)
}

/// Compute the set of microdescriptor digests a consensus references
/// that the store doesn't have, excluding anything already in flight
/// or that has exhausted its retry budget. Unless `fetch_useless`, a
/// routerstatus without the `Running` flag is skipped: we'd never use
/// that relay, so there's no point spending a fetch on its descriptor.
pub fn missing_microdescs(
    consensus: &CurrentConsensus,
    store: &MicrodescStore,
    download_status: &mut std::collections::HashMap<MdDigest, DownloadStatus>,
    in_flight: &HashSet<MdDigest>,
    fetch_useless: bool,
    now: SystemTime,
) -> Vec<MdDigest> {
    let mut missing = Vec::new();
    for rs in consensus.routerstatuses() {
        let Some(digest) = rs.microdesc_digest.as_ref() else {
            continue;
        };
        if digest.iter().all(|b| *b == 0) {
            continue;
        }
        if !fetch_useless && !rs.has_flag("Running") {
            continue;
        }
        if store.lookup(digest).is_some() {
            continue;
        }
        if in_flight.contains(digest) {
            continue;
        }
        let status = download_status.entry(*digest).or_default();
        if status.exhausted(CONSENSUS_NETWORKSTATUS_MAX_DL_TRIES) {
            continue;
        }
        if !status.ready_at(now) {
            continue;
        }
        missing.push(*digest);
    }
    missing
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use tor_netdoc::doc::netstatus::{ConsensusFlavor, UncheckedConsensus};

    fn consensus_at(valid_after_secs: u64) -> CurrentConsensus {
        let valid_after = SystemTime::UNIX_EPOCH + Duration::from_secs(valid_after_secs);
        CurrentConsensus::new(UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after,
            fresh_until: valid_after + Duration::from_secs(3600),
            valid_until: valid_after + Duration::from_secs(3 * 3600),
            routerstatuses: Vec::new(),
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: HashMap::new(),
            weight_params: HashMap::new(),
        })
    }

    #[test]
    fn s6_client_window_is_past_three_quarters() {
        let consensus = consensus_at(0);
        let (start, window) = client_fetch_window(&consensus);
        assert_eq!(start, consensus.fresh_until() + Duration::from_secs(2700));
        assert!(window <= consensus.valid_until().duration_since(start).unwrap());
    }

    #[test]
    fn cache_window_capped_by_min_slop() {
        let consensus = consensus_at(0);
        let (start, _) = cache_fetch_window(&consensus, false);
        assert_eq!(start, consensus.fresh_until() + Duration::from_secs(120));
    }

    #[test]
    fn cache_window_extra_early_is_capped_at_sixty_seconds() {
        let consensus = consensus_at(0);
        let (_, window) = cache_fetch_window(&consensus, true);
        assert_eq!(window, Duration::from_secs(60));
    }

    #[test]
    fn bridge_shift_uses_spec_formula_not_a_quarter_window() {
        let consensus = consensus_at(0);
        let (client_start, client_window) = client_fetch_window(&consensus);
        let interval = consensus.fresh_until().duration_since(consensus.valid_after()).unwrap();
        let slop = min_slop(interval);
        let mut rng = rand::thread_rng();
        let now = SystemTime::UNIX_EPOCH;
        let bridge_time = next_fetch_time(Some(&consensus), false, true, false, now, &mut rng);
        let expected_start = client_start + client_window + slop;
        assert!(bridge_time >= expected_start);
    }

    #[test]
    fn no_consensus_means_fetch_now() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let mut rng = rand::thread_rng();
        assert_eq!(next_fetch_time(None, false, false, false, now, &mut rng), now);
    }

    #[test]
    fn zero_digest_is_never_missing() {
        let consensus = consensus_at(0);
        let dir = tempfile::TempDir::new().unwrap();
        let store = MicrodescStore::new(dir.path());
        let mut statuses = HashMap::new();
        let missing = missing_microdescs(&consensus, &store, &mut statuses, &HashSet::new(), true, SystemTime::now());
        assert!(missing.is_empty());
    }

    #[test]
    fn non_running_relay_is_skipped_unless_fetch_useless() {
        let valid_after = SystemTime::UNIX_EPOCH;
        let digest = [7u8; 32];
        let rs = crate::netstatus::RouterStatus {
            nickname: "relay".into(),
            rsa_identity: tor_llcrypto::pk::rsa::RsaIdentity::from_bytes(&[1u8; 20]).unwrap(),
            microdesc_digest: Some(digest),
            flags: Vec::new(),
        };
        let consensus = CurrentConsensus::new(UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after,
            fresh_until: valid_after + Duration::from_secs(3600),
            valid_until: valid_after + Duration::from_secs(3 * 3600),
            routerstatuses: vec![rs],
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: HashMap::new(),
            weight_params: HashMap::new(),
        });

        let dir = tempfile::TempDir::new().unwrap();
        let store = MicrodescStore::new(dir.path());
        let in_flight = HashSet::new();
        let now = SystemTime::now();

        let mut statuses = HashMap::new();
        assert!(missing_microdescs(&consensus, &store, &mut statuses, &in_flight, false, now).is_empty());

        let mut statuses = HashMap::new();
        assert_eq!(missing_microdescs(&consensus, &store, &mut statuses, &in_flight, true, now), vec![digest]);
    }
}
