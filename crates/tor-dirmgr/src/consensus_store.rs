//! The consensus lifecycle: parse, check signatures, and hold or
//! install a per-flavor current consensus.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use tor_checkable::timed::{TimeValidityError, Timebound};
use tor_netdoc::doc::netstatus::{parse_consensus, ConsensusFlavor};

use crate::err::{DirMgrError, Result};
use crate::event::{DirEvent, DirEventPublisher};
use crate::netstatus::{CurrentConsensus, REASONABLY_LIVE_TIME};
use crate::sigcheck::{classify, AuthorityRegistry, SignatureStatus};

/// How long a consensus may sit in the waiting-for-certs slot before
/// the store gives up on it and lets a later consensus take its place.
pub const DELAY_WHILE_FETCHING_CERTS: Duration = Duration::from_secs(20 * 60);

/// How far beyond `valid_after` a consensus is allowed to claim
/// before it's treated as clock skew rather than a fresh document.
pub const EARLY_CONSENSUS_NOTICE_SKEW: Duration = Duration::from_secs(60);

/// How long we insist on having held an unverified document before
/// caching it, to give certificate fetches a chance to land first.
pub const CONSENSUS_MIN_SECONDS_BEFORE_CACHING: Duration = Duration::from_secs(120);

/// Flags controlling how [`ConsensusStore::set_current`] treats an
/// incoming document.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetCurrentFlags {
    /// The bytes came from our own disk cache, not the network: a
    /// document that's merely expired is still worth keeping around
    /// rather than discarding outright, since nothing fresher has
    /// arrived yet.
    pub from_cache: bool,
    /// This call is a re-attempt of a consensus that was previously
    /// parked in the waiting-for-certs slot.
    pub was_waiting_for_certs: bool,
    /// Never launch cert downloads on this document's behalf even if
    /// it's classified `could_be_with_certs`.
    pub dont_download_certs: bool,
    /// Accept the document even if it's already past `valid_until`.
    pub accept_obsolete: bool,
    /// Reject the document unless it matches this flavor.
    pub require_flavor: Option<ConsensusFlavor>,
}

/// What happened as a result of a [`ConsensusStore::set_current`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The consensus was installed as current for its flavor.
    Installed,
    /// The consensus parked in the waiting-for-certs slot; it needs
    /// more authority certificates before it can be judged.
    WaitingForCerts,
    /// The consensus was recognized but didn't change anything (e.g.
    /// a duplicate, or older than what's already current).
    Unchanged,
}

/// One flavor's worth of consensus state: the installed document, and
/// at most one document waiting on certificates.
#[derive(Default)]
struct FlavorSlot {
    /// The currently installed, fully-or-sufficiently-signed consensus.
    current: Option<CurrentConsensus>,
    /// A consensus that parsed and wasn't obviously unusable, but
    /// couldn't yet be classified past `could_be_with_certs`.
    waiting_for_certs: Option<(CurrentConsensus, SystemTime)>,
}

/// Owns the per-flavor current-consensus slots and drives the
/// classify/install state machine.
pub struct ConsensusStore {
    slots: HashMap<ConsensusFlavor, FlavorSlot>,
    events: Arc<DirEventPublisher>,
    /// Where `cached-<flavor>-consensus`/`unverified-<flavor>` files
    /// are read from and written to.
    cache_dir: PathBuf,
}

/// Filename of the installed, validated consensus for `flavor`.
fn cached_filename(flavor: ConsensusFlavor) -> &'static str {
    match flavor {
        ConsensusFlavor::Ns => "cached-consensus",
        ConsensusFlavor::Microdesc => "cached-microdesc-consensus",
    }
}

/// Filename of the not-yet-signature-complete consensus parked for
/// `flavor`.
fn unverified_filename(flavor: ConsensusFlavor) -> &'static str {
    match flavor {
        ConsensusFlavor::Ns => "unverified-consensus",
        ConsensusFlavor::Microdesc => "unverified-microdesc-consensus",
    }
}

/// Atomically write `bytes` to `path`: dump to a sibling `.tmp` file,
/// `sync_all`, then rename over the target. Mirrors the MDS's own
/// commit primitive (`mds.rs::rebuild`).
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(DirMgrError::from_io(e, &tmp_path));
    }
    fs::rename(&tmp_path, path).map_err(|e| DirMgrError::from_io(e, path))
}

/// Persist the installed consensus body for `flavor`.
fn persist_cached(cache_dir: &Path, flavor: ConsensusFlavor, bytes: &[u8]) -> Result<()> {
    write_atomic(&cache_dir.join(cached_filename(flavor)), bytes)
}

/// Park `bytes` in the unverified-document file for `flavor`.
fn persist_unverified(cache_dir: &Path, flavor: ConsensusFlavor, bytes: &[u8]) -> Result<()> {
    write_atomic(&cache_dir.join(unverified_filename(flavor)), bytes)
}

/// Remove `flavor`'s unverified-document file, if any. Not finding one
/// is not an error: the slot may never have been persisted, or may
/// already have been cleared.
fn remove_unverified(cache_dir: &Path, flavor: ConsensusFlavor) {
    let _ = fs::remove_file(cache_dir.join(unverified_filename(flavor)));
}

/// Carry forward per-routerstatus download state from `old` into
/// `candidate` wherever their identity digests match; both lists are
/// sorted ascending by identity digest, so this is a single merge-join
/// pass. When the referenced microdescriptor digest also matches, the
/// whole `DownloadStatus` transfers rather than just resetting.
fn carry_forward_download_status(old: &CurrentConsensus, candidate: &mut CurrentConsensus) {
    let old_rs = old.routerstatuses();
    let new_rs = candidate.routerstatuses().to_vec();
    let (mut i, mut j) = (0, 0);
    let mut carried = Vec::new();
    while i < old_rs.len() && j < new_rs.len() {
        match old_rs[i].rsa_identity.cmp(&new_rs[j].rsa_identity) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if old_rs[i].microdesc_digest == new_rs[j].microdesc_digest {
                    if let Some(status) = old.download_status_for(old_rs[i].rsa_identity) {
                        carried.push((new_rs[j].rsa_identity, status.clone()));
                    }
                }
                i += 1;
                j += 1;
            }
        }
    }
    for (identity, status) in carried {
        *candidate.download_status_mut(identity) = status;
    }
}

impl ConsensusStore {
    /// Construct an empty store rooted at `cache_dir` that will publish
    /// lifecycle events to `events`.
    pub fn new(cache_dir: impl Into<PathBuf>, events: Arc<DirEventPublisher>) -> Self {
        ConsensusStore {
            slots: HashMap::new(),
            events,
            cache_dir: cache_dir.into(),
        }
    }

    /// Load whatever `cached-<flavor>-consensus`/`unverified-<flavor>`
    /// files exist on disk, re-running each through [`set_current`]
    /// exactly as if it had just been downloaded, but tagged
    /// `from_cache` so none of it is written back to the files it came
    /// from. Safe to call on a freshly constructed store.
    pub fn load_from_disk(&mut self, registry: &AuthorityRegistry, now: SystemTime) -> Result<()> {
        for flavor in [ConsensusFlavor::Ns, ConsensusFlavor::Microdesc] {
            if let Ok(bytes) = fs::read(self.cache_dir.join(cached_filename(flavor))) {
                let flags = SetCurrentFlags { from_cache: true, ..Default::default() };
                if let Err(e) = self.set_current(&bytes, registry, now, flags) {
                    warn!(flavor = flavor.name(), error = %e, "failed to load cached consensus from disk");
                }
            }
            if let Ok(bytes) = fs::read(self.cache_dir.join(unverified_filename(flavor))) {
                let flags = SetCurrentFlags { from_cache: true, ..Default::default() };
                if let Err(e) = self.set_current(&bytes, registry, now, flags) {
                    warn!(flavor = flavor.name(), error = %e, "failed to load parked consensus from disk");
                }
            }
        }
        Ok(())
    }

    /// The installed consensus for `flavor`, if any.
    pub fn get_live(&self, flavor: ConsensusFlavor, now: SystemTime) -> Option<&CurrentConsensus> {
        self.slots
            .get(&flavor)
            .and_then(|s| s.current.as_ref())
            .filter(|c| c.is_live(now))
    }

    /// The installed consensus for `flavor`, accepting one that's
    /// merely reasonably-live rather than strictly unexpired.
    pub fn get_reasonably_live(&self, flavor: ConsensusFlavor, now: SystemTime) -> Option<&CurrentConsensus> {
        self.slots
            .get(&flavor)
            .and_then(|s| s.current.as_ref())
            .filter(|c| c.is_reasonably_live(now))
    }

    /// True if any flavor has a reasonably-live current consensus, for
    /// callers like the microdescriptor store's `clean` that only want
    /// to know whether `last_listed` can be trusted.
    pub fn any_reasonably_live(&self, now: SystemTime) -> bool {
        self.slots.values().any(|s| s.current.as_ref().is_some_and(|c| c.is_reasonably_live(now)))
    }

    /// Whether `flavor` currently has a consensus parked waiting for
    /// certificates.
    pub fn is_waiting_for_certs(&self, flavor: ConsensusFlavor) -> bool {
        self.slots.get(&flavor).is_some_and(|s| s.waiting_for_certs.is_some())
    }

    /// Parse, classify, and (if warranted) install `bytes` as the
    /// current consensus for its flavor.
    pub fn set_current(
        &mut self,
        bytes: &[u8],
        registry: &AuthorityRegistry,
        now: SystemTime,
        flags: SetCurrentFlags,
    ) -> Result<Outcome> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DirMgrError::ProtocolViolation("consensus bytes were not UTF-8"))?;

        // 1. parse
        let unchecked = parse_consensus(text).map_err(|e| DirMgrError::ParseError {
            doc: "consensus",
            source: Arc::new(e),
        })?;

        // 2. flavor check
        if let Some(want) = flags.require_flavor {
            if unchecked.flavor != want {
                return Err(DirMgrError::ProtocolViolation("consensus flavor did not match request"));
            }
        }

        // 3./4. drop-if-unusable / drop-if-expired-from-cache
        let bound = unchecked.clone().into_timebound();
        let checked = match bound.check_valid_at(&now) {
            Ok(c) => c,
            // accept_obsolete overrides any staleness outright.
            Err(_) if flags.accept_obsolete => unchecked,
            // from_cache alone tolerates expiry only within a tunable
            // horizon: a cached document expired a minute ago is still
            // worth keeping until something fresher lands, but one
            // expired for a year is not.
            Err(TimeValidityError::Expired) if flags.from_cache => {
                let horizon = now.checked_sub(REASONABLY_LIVE_TIME).unwrap_or(SystemTime::UNIX_EPOCH);
                if unchecked.valid_until < horizon {
                    debug!(
                        flavor = unchecked.flavor.name(),
                        "dropping cached consensus expired beyond the reasonably-live horizon"
                    );
                    return Ok(Outcome::Unchanged);
                }
                unchecked
            }
            Err(_) => {
                return Err(DirMgrError::ProtocolViolation("consensus is not within its validity window"));
            }
        };

        if checked.valid_after > now + EARLY_CONSENSUS_NOTICE_SKEW {
            self.events.publish(DirEvent::ClockSkew);
            warn!("consensus claims to start more than 60s in the future: possible clock skew");
        }

        let candidate = CurrentConsensus::new(checked);
        let flavor = candidate.flavor();

        // 5. digest/valid_after comparison against what's already current
        if let Some(slot) = self.slots.get(&flavor) {
            if let Some(existing) = &slot.current {
                if candidate.valid_after() <= existing.valid_after() {
                    debug!(flavor = flavor.name(), "ignoring consensus no newer than the current one");
                    return Ok(Outcome::Unchanged);
                }
            }
        }

        // 6. SV verify with classification branching
        let classification = classify(&candidate, registry);
        self.events.publish(DirEvent::ConsensusArrived);

        match classification.status {
            SignatureStatus::Unsignable => {
                if flags.was_waiting_for_certs {
                    // Re-entry from the waiting slot: silently clear it
                    // and unlink the parked file rather than erroring,
                    // since nothing was ever installed on its behalf.
                    remove_unverified(&self.cache_dir, flavor);
                    return Ok(Outcome::Unchanged);
                }
                Err(DirMgrError::SignatureBad)
            }
            SignatureStatus::CouldBeWithCerts => {
                if !flags.from_cache {
                    if let Err(e) = persist_unverified(&self.cache_dir, flavor, candidate.signed_text().as_bytes()) {
                        warn!(flavor = flavor.name(), error = %e, "failed to persist unverified consensus");
                    }
                }
                let slot = self.slots.entry(flavor).or_default();
                slot.waiting_for_certs = Some((candidate, now + DELAY_WHILE_FETCHING_CERTS));
                let _ = flags.dont_download_certs; // consulted by the scheduler, not here
                Ok(Outcome::WaitingForCerts)
            }
            SignatureStatus::SufficientlySigned | SignatureStatus::FullySigned => {
                self.install(flavor, candidate, flags.from_cache);
                Ok(Outcome::Installed)
            }
        }
    }

    /// Install `candidate` as current for `flavor`, carrying over
    /// download-status state from the document it replaces, clearing
    /// any waiting-for-certs slot of the same or older vintage, and
    /// (unless `from_cache`) persisting the new body to
    /// `cached-<flavor>-consensus`.
    fn install(&mut self, flavor: ConsensusFlavor, mut candidate: CurrentConsensus, from_cache: bool) {
        let cache_dir = self.cache_dir.clone();
        let slot = self.slots.entry(flavor).or_default();

        if let Some((waiting, _)) = &slot.waiting_for_certs {
            if waiting.valid_after() <= candidate.valid_after() {
                slot.waiting_for_certs = None;
                remove_unverified(&cache_dir, flavor);
            }
        }

        if let Some(old) = slot.current.take() {
            carry_forward_download_status(&old, &mut candidate);
        }

        if !from_cache {
            if let Err(e) = persist_cached(&cache_dir, flavor, candidate.signed_text().as_bytes()) {
                warn!(flavor = flavor.name(), error = %e, "failed to persist installed consensus");
            }
        }

        info!(
            flavor = flavor.name(),
            valid_after = ?candidate.valid_after(),
            n_relays = candidate.routerstatuses().len(),
            "installed new consensus"
        );
        slot.current = Some(candidate);
        self.events.publish(DirEvent::NewConsensus(flavor));
    }

    /// Re-attempt every waiting-for-certs slot, now that new
    /// certificates may have arrived.
    pub fn note_certs_arrived(&mut self, registry: &AuthorityRegistry, now: SystemTime) {
        let flavors: Vec<ConsensusFlavor> = self.slots.keys().copied().collect();
        for flavor in flavors {
            let waiting = self.slots.get_mut(&flavor).and_then(|s| s.waiting_for_certs.take());
            let Some((candidate, deadline)) = waiting else { continue };

            if now >= deadline {
                warn!(flavor = flavor.name(), "giving up on consensus stuck waiting for certs");
                remove_unverified(&self.cache_dir, flavor);
                continue;
            }

            let classification = classify(&candidate, registry);
            match classification.status {
                SignatureStatus::SufficientlySigned | SignatureStatus::FullySigned => {
                    self.install(flavor, candidate, false);
                }
                SignatureStatus::Unsignable => {
                    warn!(flavor = flavor.name(), "consensus became unsignable after new certs arrived");
                    remove_unverified(&self.cache_dir, flavor);
                }
                SignatureStatus::CouldBeWithCerts => {
                    self.slots.entry(flavor).or_default().waiting_for_certs = Some((candidate, deadline));
                }
            }
        }
    }

    /// Every flavor currently holding a waiting-for-certs document,
    /// with the (identity, signing-key) pairs its classification still
    /// needs, for the scheduler to fetch.
    pub fn missing_certs(&self, registry: &AuthorityRegistry) -> Vec<(tor_llcrypto::pk::rsa::RsaIdentity, tor_llcrypto::pk::rsa::RsaIdentity)> {
        self.slots
            .values()
            .filter_map(|s| s.waiting_for_certs.as_ref())
            .flat_map(|(c, _)| classify(c, registry).missing_certs)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sigcheck::Authority;

    fn registry(n: u8) -> AuthorityRegistry {
        AuthorityRegistry::new((0..n).map(|i| Authority {
            identity: tor_llcrypto::pk::rsa::RsaIdentity::from([i; 20]),
        }))
    }

    fn sample_text(valid_after: &str, fresh_until: &str, valid_until: &str) -> String {
        format!(
            "network-status-version 3 microdesc\n\
consensus-method 28\n\
valid-after {valid_after}\n\
fresh-until {fresh_until}\n\
valid-until {valid_until}\n"
        )
    }

    fn rs_with_digest(id: tor_llcrypto::pk::rsa::RsaIdentity, digest: Option<[u8; 32]>) -> tor_netdoc::doc::netstatus::RouterStatus {
        tor_netdoc::doc::netstatus::RouterStatus {
            nickname: "relay".into(),
            rsa_identity: id,
            microdesc_digest: digest,
            flags: Vec::new(),
        }
    }

    fn consensus_with_rs(rs: Vec<tor_netdoc::doc::netstatus::RouterStatus>) -> CurrentConsensus {
        use std::time::Duration;
        let valid_after = SystemTime::UNIX_EPOCH;
        CurrentConsensus::new(tor_netdoc::doc::netstatus::UncheckedConsensus {
            flavor: ConsensusFlavor::Microdesc,
            consensus_method: 28,
            valid_after,
            fresh_until: valid_after + Duration::from_secs(3600),
            valid_until: valid_after + Duration::from_secs(7200),
            routerstatuses: rs,
            signatures: Vec::new(),
            signed_text: String::new(),
            net_params: HashMap::new(),
            weight_params: HashMap::new(),
        })
    }

    #[test]
    fn download_status_carries_over_on_matching_identity_and_digest() {
        use std::time::Duration;
        let id = tor_llcrypto::pk::rsa::RsaIdentity::from([4; 20]);
        let digest = [9u8; 32];

        let mut old = consensus_with_rs(vec![rs_with_digest(id, Some(digest))]);
        old.download_status_mut(id).note_failure(SystemTime::UNIX_EPOCH, Duration::from_secs(60));
        assert_eq!(old.download_status_for(id).unwrap().n_attempts, 1);

        let mut candidate = consensus_with_rs(vec![rs_with_digest(id, Some(digest))]);
        carry_forward_download_status(&old, &mut candidate);
        assert_eq!(candidate.download_status_for(id).unwrap().n_attempts, 1);
    }

    #[test]
    fn download_status_does_not_carry_over_when_digest_changes() {
        use std::time::Duration;
        let id = tor_llcrypto::pk::rsa::RsaIdentity::from([5; 20]);

        let mut old = consensus_with_rs(vec![rs_with_digest(id, Some([1u8; 32]))]);
        old.download_status_mut(id).note_failure(SystemTime::UNIX_EPOCH, Duration::from_secs(60));

        let mut candidate = consensus_with_rs(vec![rs_with_digest(id, Some([2u8; 32]))]);
        carry_forward_download_status(&old, &mut candidate);
        assert!(candidate.download_status_for(id).is_none());
    }

    fn store() -> (ConsensusStore, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConsensusStore::new(dir.path(), DirEventPublisher::new());
        (store, dir)
    }

    #[test]
    fn s4_pending_certs_then_unchanged_on_older() {
        let (mut store, _dir) = store();
        let registry = registry(5); // no certs recorded: every sig is missing-key
        let now = humantime::parse_rfc3339_weak("2023-01-01 00:00:00").unwrap();
        let mut text = sample_text("2023-01-01 00:00:00", "2023-01-01 01:00:00", "2023-01-01 03:00:00");
        for i in 0..3u8 {
            let id = tor_llcrypto::pk::rsa::RsaIdentity::from([i; 20]);
            text.push_str(&format!(
                "directory-signature sha256 {id} 1111111111111111111111111111111111111111\n-----BEGIN SIGNATURE-----\nAAAA\n-----END SIGNATURE-----\n"
            ));
        }
        let outcome = store
            .set_current(text.as_bytes(), &registry, now, SetCurrentFlags::default())
            .unwrap();
        assert_eq!(outcome, Outcome::WaitingForCerts);
        assert!(store.is_waiting_for_certs(ConsensusFlavor::Microdesc));
    }

    #[test]
    fn unsignable_without_any_authorities() {
        let (mut store, _dir) = store();
        let registry = registry(0);
        let now = humantime::parse_rfc3339_weak("2023-01-01 00:00:00").unwrap();
        let text = sample_text("2023-01-01 00:00:00", "2023-01-01 01:00:00", "2023-01-01 03:00:00");
        let err = store
            .set_current(text.as_bytes(), &registry, now, SetCurrentFlags::default())
            .unwrap_err();
        assert!(matches!(err, DirMgrError::SignatureBad));
    }

    #[test]
    fn install_persists_and_reload_recovers() {
        let (mut store, dir) = store();
        let registry = registry(0); // quorum doesn't matter: nothing signs below
        let now = humantime::parse_rfc3339_weak("2023-01-01 00:00:00").unwrap();
        let text = sample_text("2023-01-01 00:00:00", "2023-01-01 01:00:00", "2023-01-01 03:00:00");
        // No authorities at all means every signature counts as
        // "missing key", which classifies as could-be-with-certs, not
        // installed; exercise persistence through that path instead.
        let outcome = store
            .set_current(text.as_bytes(), &registry, now, SetCurrentFlags::default())
            .unwrap();
        assert_eq!(outcome, Outcome::WaitingForCerts);
        assert!(dir.path().join("unverified-microdesc-consensus").exists());

        let mut reloaded = ConsensusStore::new(dir.path(), DirEventPublisher::new());
        reloaded.load_from_disk(&registry, now).unwrap();
        assert!(reloaded.is_waiting_for_certs(ConsensusFlavor::Microdesc));
    }

    #[test]
    fn from_cache_expired_within_horizon_is_kept() {
        let (mut store, _dir) = store();
        let registry = registry(0);
        let now = humantime::parse_rfc3339_weak("2023-01-02 00:00:00").unwrap();
        let text = sample_text("2023-01-01 00:00:00", "2023-01-01 01:00:00", "2023-01-01 03:00:00");
        let flags = SetCurrentFlags { from_cache: true, ..Default::default() };
        // valid_until is 21 hours before `now`, within the 24h horizon:
        // the document should still be classified (not silently
        // dropped), landing in the waiting-for-certs slot here since
        // there's no authority to sign it.
        let outcome = store.set_current(text.as_bytes(), &registry, now, flags).unwrap();
        assert_eq!(outcome, Outcome::WaitingForCerts);
    }

    #[test]
    fn from_cache_expired_beyond_horizon_is_dropped() {
        let (mut store, _dir) = store();
        let registry = registry(0);
        let now = humantime::parse_rfc3339_weak("2023-02-01 00:00:00").unwrap();
        let text = sample_text("2023-01-01 00:00:00", "2023-01-01 01:00:00", "2023-01-01 03:00:00");
        let flags = SetCurrentFlags { from_cache: true, ..Default::default() };
        let outcome = store.set_current(text.as_bytes(), &registry, now, flags).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }
}
