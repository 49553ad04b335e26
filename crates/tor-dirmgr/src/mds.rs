//! The microdescriptor store: an mmap-backed cache with an append-only
//! journal, keyed by SHA-256 digest.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tor_netdoc::doc::microdesc::{self, MdDigest};
use tracing::{debug, info, warn};

use crate::err::{DirMgrError, Result};
use crate::microdesc::{MdBody, MicrodescEntry};

/// Below this many bytes of journal, never auto-rebuild.
const REBUILD_MIN_JOURNAL: u64 = 16 * 1024;

/// How long an md can go without appearing in a live consensus before
/// `clean` drops it.
pub const TOLERATE_MICRODESC_AGE: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);

/// Where a caller wants a freshly-added microdescriptor's body to live.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyLocation {
    /// Body bytes point into the main cache's mmap (the bytes being
    /// added are already the content of that file, e.g. during
    /// `reload`).
    InCache,
    /// Body bytes must be copied and appended to the journal.
    InJournal,
    /// Body bytes must be copied, but never written to disk at all.
    Nowhere,
}

/// A read-only mmap of the main cache file.
pub struct CacheMap {
    /// The live mapping, if the file was non-empty.
    #[cfg(feature = "mmap")]
    map: Option<memmap2::Mmap>,
    /// Fallback storage when the `mmap` feature is disabled: the whole
    /// file read into memory.
    #[cfg(not(feature = "mmap"))]
    buf: Vec<u8>,
}

impl CacheMap {
    /// Memory-map (or read) `file`.
    fn open(file: &File) -> std::io::Result<Self> {
        #[cfg(feature = "mmap")]
        {
            let len = file.metadata()?.len();
            let map = if len == 0 {
                None
            } else {
                // Safety: the main cache file is only ever replaced via
                // rename, never truncated-in-place, while mapped.
                Some(unsafe { memmap2::Mmap::map(file)? })
            };
            Ok(CacheMap { map })
        }
        #[cfg(not(feature = "mmap"))]
        {
            use std::io::Read;
            let mut f = file.try_clone()?;
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            Ok(CacheMap { buf })
        }
    }

    /// Borrow the mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        #[cfg(feature = "mmap")]
        {
            self.map.as_deref().unwrap_or(&[])
        }
        #[cfg(not(feature = "mmap"))]
        {
            &self.buf
        }
    }
}

/// A candidate microdescriptor parsed from freshly-received bytes, not
/// yet inserted into the store.
struct Candidate {
    digest: MdDigest,
    text: String,
    parsed: microdesc::Microdesc,
}

/// The mmap+journal microdescriptor cache.
pub struct MicrodescStore {
    /// Directory holding `cached-microdescs` and `cached-microdescs.new`.
    cache_dir: PathBuf,
    /// In-memory index from digest to entry. This *is* the
    /// `held_in_map` bit: membership here is the invariant, not a
    /// separate flag.
    index: HashMap<MdDigest, MicrodescEntry>,
    /// The current main-cache mapping, shared by every `InCache` body.
    mmap: Option<Arc<CacheMap>>,
    /// Bytes appended to the journal since the last rebuild.
    journal_bytes: u64,
    /// Bytes freed by `clean` since the last rebuild, used to decide
    /// whether a rebuild is due.
    bytes_dropped: u64,
    /// Running total of body bytes ever seen, for `average_size`.
    total_body_bytes_seen: u64,
    /// Running count of bodies ever seen, for `average_size`.
    n_seen: u64,
}

impl MicrodescStore {
    /// Path of the main cache file.
    fn main_path(&self) -> PathBuf {
        self.cache_dir.join("cached-microdescs")
    }

    /// Path of the journal file.
    fn journal_path(&self) -> PathBuf {
        self.cache_dir.join("cached-microdescs.new")
    }

    /// Create a store rooted at `cache_dir`, without loading anything
    /// from disk yet. Call [`reload`](Self::reload) to populate it.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        MicrodescStore {
            cache_dir: cache_dir.into(),
            index: HashMap::new(),
            mmap: None,
            journal_bytes: 0,
            bytes_dropped: 0,
            total_body_bytes_seen: 0,
            n_seen: 0,
        }
    }

    /// Number of microdescriptors currently in the store.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if the store holds no microdescriptors.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Look up a microdescriptor by digest.
    pub fn lookup(&self, digest: &MdDigest) -> Option<&MicrodescEntry> {
        self.index.get(digest)
    }

    /// Iterate over every entry currently in the store.
    pub fn iter(&self) -> impl Iterator<Item = (&MdDigest, &MicrodescEntry)> {
        self.index.iter()
    }

    /// Record that a node table now holds a reference to `digest`,
    /// incrementing its `held_by_nodes` count. A no-op, warning-free, if
    /// the digest isn't present (the entry may have been evicted between
    /// the node table's lookup and this call).
    pub fn note_node_acquired(&mut self, digest: &MdDigest) {
        if let Some(entry) = self.index.get_mut(digest) {
            entry.held_by_nodes += 1;
        }
    }

    /// Record that a node table dropped its reference to `digest`,
    /// decrementing its `held_by_nodes` count. Warns if the digest isn't
    /// present, since releasing a reference we never recorded as
    /// acquired means the counters have drifted.
    pub fn note_node_released(&mut self, digest: &MdDigest) {
        match self.index.get_mut(digest) {
            Some(entry) => entry.held_by_nodes = entry.held_by_nodes.saturating_sub(1),
            None => warn!(digest = %hex::encode(digest), "node table released a digest the store never held"),
        }
    }

    /// The mean body size seen so far, or 512 if nothing has been seen.
    pub fn average_size(&self) -> u64 {
        if self.n_seen == 0 {
            512
        } else {
            self.total_body_bytes_seen / self.n_seen
        }
    }

    /// Parse `bytes` and add whatever candidates they contain.
    ///
    /// `requested`, if given, is the exact set of digests the caller
    /// asked for; any delivered digest not in that set is a protocol
    /// violation and is dropped (not inserted), and any digest that
    /// *is* delivered is removed from `requested`.
    pub fn add_bytes(
        &mut self,
        bytes: &[u8],
        location: BodyLocation,
        no_save: bool,
        listed_at: Option<SystemTime>,
        requested: Option<&mut HashSet<MdDigest>>,
    ) -> Result<Vec<MdDigest>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DirMgrError::ProtocolViolation("microdescriptor bytes were not UTF-8"))?;
        let parsed = microdesc::parse_microdescriptors(text).map_err(|e| DirMgrError::ParseError {
            doc: "microdescriptor",
            source: Arc::new(e),
        })?;

        let mut candidates = Vec::with_capacity(parsed.len());
        for pmd in parsed {
            if let Some(requested) = requested.as_deref() {
                if !requested.contains(&pmd.digest) {
                    warn!(digest = %hex::encode(pmd.digest), "dropping undelivered-as-requested microdescriptor");
                    continue;
                }
            }
            candidates.push(Candidate {
                digest: pmd.digest,
                text: pmd.text,
                parsed: pmd.microdesc,
            });
        }
        if let Some(requested) = requested {
            for c in &candidates {
                requested.remove(&c.digest);
            }
        }

        self.add_list(candidates, location, no_save, listed_at)
    }

    /// Insert already-parsed candidates.
    fn add_list(
        &mut self,
        candidates: Vec<Candidate>,
        location: BodyLocation,
        no_save: bool,
        listed_at: Option<SystemTime>,
    ) -> Result<Vec<MdDigest>> {
        // Merge duplicates against the existing index first, so that
        // only genuinely new candidates touch the journal.
        let mut fresh = Vec::with_capacity(candidates.len());
        for c in candidates {
            if let Some(existing) = self.index.get_mut(&c.digest) {
                if let Some(t) = listed_at {
                    if t > existing.last_listed {
                        existing.last_listed = t;
                    }
                }
                // Per design: a duplicate merge never touches
                // `bytes_dropped`; that accrues only on expiry.
                continue;
            }
            fresh.push(c);
        }

        let mut added = Vec::with_capacity(fresh.len());
        let journal_payload = self.build_journal_payload(&fresh, location, no_save, listed_at);

        if !journal_payload.is_empty() {
            self.append_journal(&journal_payload)?;
        }

        let mut offset_cursor = self.journal_bytes - journal_payload.len() as u64;
        for c in fresh {
            self.total_body_bytes_seen += c.text.len() as u64;
            self.n_seen += 1;

            let body = match location {
                BodyLocation::InCache => {
                    let mmap = self.mmap.clone().expect("InCache add with no mmap open");
                    let offset = find_offset(mmap.as_bytes(), c.text.as_bytes());
                    MdBody::InCache { mmap, offset }
                }
                BodyLocation::InJournal => {
                    let annotation_len = annotation_len(listed_at);
                    let offset = offset_cursor + annotation_len as u64;
                    offset_cursor += annotation_len as u64 + c.text.len() as u64;
                    MdBody::InJournal {
                        buf: Arc::from(c.text.as_bytes()),
                        offset,
                    }
                }
                BodyLocation::Nowhere if !no_save => {
                    let annotation_len = annotation_len(listed_at);
                    let offset = offset_cursor + annotation_len as u64;
                    offset_cursor += annotation_len as u64 + c.text.len() as u64;
                    MdBody::InJournal {
                        buf: Arc::from(c.text.as_bytes()),
                        offset,
                    }
                }
                BodyLocation::Nowhere => MdBody::Heap {
                    buf: Arc::from(c.text.as_bytes()),
                },
            };

            let entry = MicrodescEntry {
                digest: c.digest,
                body_len: c.text.len(),
                body,
                last_listed: listed_at.unwrap_or(SystemTime::UNIX_EPOCH),
                no_save,
                held_by_nodes: 0,
                parsed: c.parsed,
            };
            added.push(c.digest);
            self.index.insert(c.digest, entry);
        }

        Ok(added)
    }

    /// Build the bytes that should be appended to the journal for
    /// `fresh`, or an empty vec if nothing needs journaling.
    fn build_journal_payload(
        &self,
        fresh: &[Candidate],
        location: BodyLocation,
        no_save: bool,
        listed_at: Option<SystemTime>,
    ) -> Vec<u8> {
        if !matches!(location, BodyLocation::InJournal)
            && !(matches!(location, BodyLocation::Nowhere) && !no_save)
        {
            return Vec::new();
        }
        let mut out = Vec::new();
        for c in fresh {
            if let Some(t) = listed_at {
                out.extend_from_slice(annotation_line(t).as_bytes());
            }
            out.extend_from_slice(c.text.as_bytes());
        }
        out
    }

    /// Append `payload` to the journal file, aborting (and leaving the
    /// file at its original length) on any I/O error.
    fn append_journal(&mut self, payload: &[u8]) -> Result<()> {
        let path = self.journal_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DirMgrError::from_io(e, &path))?;
        let original_len = file
            .metadata()
            .map_err(|e| DirMgrError::from_io(e, &path))?
            .len();

        let result = file.write_all(payload).and_then(|_| file.sync_data());
        match result {
            Ok(()) => {
                self.journal_bytes += payload.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Abort: discard whatever partial data made it to disk.
                let _ = file.set_len(original_len);
                Err(DirMgrError::from_io(e, &path))
            }
        }
    }

    /// Remove every entry whose `last_listed` is older than `cutoff`,
    /// unless `force` is false and there is no reasonably-live
    /// microdesc consensus to trust `last_listed` against.
    pub fn clean(&mut self, cutoff: SystemTime, force: bool, reasonably_live_consensus: bool) {
        if !force && !reasonably_live_consensus {
            debug!("skipping microdescriptor clean: no reasonably-live consensus");
            return;
        }
        let stale: Vec<MdDigest> = self
            .index
            .iter()
            .filter(|(_, e)| e.last_listed < cutoff)
            .map(|(d, _)| *d)
            .collect();
        for digest in stale {
            if let Some(entry) = self.index.remove(&digest) {
                self.bytes_dropped += entry.body_len as u64;
                if entry.held_by_nodes > 0 {
                    warn!(
                        digest = %hex::encode(digest),
                        held_by_nodes = entry.held_by_nodes,
                        "expiring microdescriptor still referenced by node table"
                    );
                }
            }
        }
    }

    /// Default cutoff for [`clean`](Self::clean): seven days ago.
    pub fn default_cutoff(now: SystemTime) -> SystemTime {
        now.checked_sub(TOLERATE_MICRODESC_AGE).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Decide whether a rebuild is due, given the current journal and
    /// main-file sizes.
    fn should_rebuild(&self, main_size: u64) -> bool {
        if self.journal_bytes < REBUILD_MIN_JOURNAL {
            return false;
        }
        if self.bytes_dropped > (self.journal_bytes + main_size) / 3 {
            return true;
        }
        if self.journal_bytes > main_size / 2 {
            return true;
        }
        false
    }

    /// Compact the store: write every live, non-`no_save` entry to a
    /// fresh main file, remap it, and truncate the journal.
    ///
    /// Runs unconditionally if `force`; otherwise only if
    /// [`should_rebuild`](Self::should_rebuild) says so.
    pub fn rebuild(&mut self, force: bool) -> Result<bool> {
        let main_size = self.main_path().metadata().map(|m| m.len()).unwrap_or(0);
        if !force && !self.should_rebuild(main_size) {
            return Ok(false);
        }

        self.clean(SystemTime::UNIX_EPOCH, false, false);

        let tmp_path = self.cache_dir.join("cached-microdescs.tmp");
        let result = self.dump_to_temp_file(&tmp_path);
        let offsets = match result {
            Ok(offsets) => offsets,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        let main_path = self.main_path();
        std::fs::rename(&tmp_path, &main_path).map_err(|e| DirMgrError::from_io(e, &main_path))?;

        let file = File::open(&main_path).map_err(|e| DirMgrError::from_io(e, &main_path))?;
        let new_map = Arc::new(CacheMap::open(&file).map_err(|e| DirMgrError::from_io(e, &main_path))?);

        for (digest, offset) in offsets {
            if let Some(entry) = self.index.get_mut(&digest) {
                let body = new_map.as_bytes();
                let slice = &body[offset..offset + entry.body_len];
                if !slice.starts_with(b"onion-key") {
                    return Err(DirMgrError::CacheCorruption(
                        "rewritten microdescriptor did not start with onion-key",
                    ));
                }
                entry.body = MdBody::InCache {
                    mmap: Arc::clone(&new_map),
                    offset,
                };
            }
        }
        // The old mmap (if any) is dropped here, after every surviving
        // entry has been re-pointed at `new_map`.
        self.mmap = Some(new_map);

        let journal_path = self.journal_path();
        if journal_path.exists() {
            std::fs::remove_file(&journal_path).map_err(|e| DirMgrError::from_io(e, &journal_path))?;
        }
        self.journal_bytes = 0;
        self.bytes_dropped = 0;

        info!(entries = self.index.len(), "rebuilt microdescriptor cache");
        Ok(true)
    }

    /// Write every live, non-`no_save` entry to `tmp_path`, returning
    /// each digest's byte offset (of its body, after the annotation)
    /// within that file.
    fn dump_to_temp_file(&self, tmp_path: &Path) -> Result<Vec<(MdDigest, usize)>> {
        let mut file = File::create(tmp_path).map_err(|e| DirMgrError::from_io(e, tmp_path))?;
        let mut offsets = Vec::with_capacity(self.index.len());
        let mut pos = 0usize;
        for (digest, entry) in &self.index {
            if entry.no_save {
                continue;
            }
            let annotation = entry.annotation();
            file.write_all(annotation.as_bytes())
                .map_err(|e| DirMgrError::from_io(e, tmp_path))?;
            pos += annotation.len();
            file.write_all(entry.body_bytes())
                .map_err(|e| DirMgrError::from_io(e, tmp_path))?;
            offsets.push((*digest, pos));
            pos += entry.body_len;
        }
        file.sync_all().map_err(|e| DirMgrError::from_io(e, tmp_path))?;
        Ok(offsets)
    }

    /// Clear all in-memory state, then load the main cache and journal
    /// from disk and run a rebuild pass.
    pub fn reload(&mut self) -> Result<()> {
        self.index.clear();
        self.mmap = None;
        self.journal_bytes = 0;
        self.bytes_dropped = 0;

        let main_path = self.main_path();
        if let Ok(file) = File::open(&main_path) {
            let map = Arc::new(CacheMap::open(&file).map_err(|e| DirMgrError::from_io(e, &main_path))?);
            let text = std::str::from_utf8(map.as_bytes())
                .map_err(|_| DirMgrError::ProtocolViolation("cache file was not UTF-8"))?
                .to_string();
            self.mmap = Some(Arc::clone(&map));
            self.ingest_annotated(&text, BodyLocation::InCache)?;
        }

        let journal_path = self.journal_path();
        if let Ok(bytes) = std::fs::read(&journal_path) {
            self.journal_bytes = bytes.len() as u64;
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| DirMgrError::ProtocolViolation("journal file was not UTF-8"))?
                .to_string();
            self.ingest_annotated(&text, BodyLocation::InJournal)?;
        }

        self.rebuild(false)?;
        Ok(())
    }

    /// Ingest `text`, which may contain `@last-listed` annotations
    /// preceding each microdescriptor, as read back from disk.
    fn ingest_annotated(&mut self, text: &str, location: BodyLocation) -> Result<()> {
        let (entries, last_listed_by_start) = split_annotated(text);
        for (offset_in_text, body_text) in entries {
            let listed_at = last_listed_by_start.get(&offset_in_text).copied();
            let parsed = microdesc::parse_microdescriptors(body_text).map_err(|e| DirMgrError::ParseError {
                doc: "microdescriptor",
                source: Arc::new(e),
            })?;
            let candidates: Vec<Candidate> = parsed
                .into_iter()
                .map(|pmd| Candidate {
                    digest: pmd.digest,
                    text: pmd.text,
                    parsed: pmd.microdesc,
                })
                .collect();
            self.add_list(candidates, location, false, listed_at)?;
        }
        Ok(())
    }
}

/// Length in bytes of the `@last-listed` annotation line that would be
/// written for `listed_at`, or 0 if none.
fn annotation_len(listed_at: Option<SystemTime>) -> usize {
    listed_at.map(|t| annotation_line(t).len()).unwrap_or(0)
}

/// Render the `@last-listed` annotation line for `t`.
fn annotation_line(t: SystemTime) -> String {
    let ts: humantime::Timestamp = t.into();
    let s = ts.to_string().replacen('T', " ", 1);
    format!("@last-listed {}\n", s.trim_end_matches('Z'))
}

/// Split `text` (a concatenation of optionally-annotated
/// microdescriptors) into `(byte offset of body, body text)` pairs,
/// plus a map from that same offset to the parsed `last_listed` time.
fn split_annotated(text: &str) -> (Vec<(usize, &str)>, HashMap<usize, SystemTime>) {
    let mut entries = Vec::new();
    let mut times = HashMap::new();
    let mut pos = 0usize;
    while pos < text.len() {
        let rest = &text[pos..];
        let mut body_start = pos;
        if rest.starts_with('@') {
            if let Some(line_end) = rest.find('\n') {
                if let Some(stripped) = rest[..line_end].strip_prefix("@last-listed ") {
                    if let Ok(t) = parse_annotation_time(stripped) {
                        times.insert(pos + line_end + 1, t);
                    }
                }
                body_start = pos + line_end + 1;
            }
        }
        let next = text[body_start..]
            .find("\nonion-key")
            .map(|i| body_start + i + 1)
            .unwrap_or(text.len());
        entries.push((body_start, &text[body_start..next]));
        pos = next;
    }
    (entries, times)
}

/// Parse an `@last-listed` annotation's timestamp (`YYYY-MM-DD
/// HH:MM:SS`).
fn parse_annotation_time(s: &str) -> std::result::Result<SystemTime, humantime::TimestampError> {
    let rfc3339 = format!("{}T{}Z", s.get(0..10).unwrap_or(""), s.get(11..).unwrap_or(""));
    rfc3339.parse::<humantime::Timestamp>().map(Into::into)
}

/// Find the byte offset of `needle` within `haystack`.
///
/// Used right after a fresh write to the main cache, so the needle is
/// guaranteed to occur exactly once at a known location; this linear
/// scan only runs while ingesting `in_cache` bytes directly (not on
/// the hot path).
fn find_offset(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len().max(1))
        .position(|w| w == needle)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn sample_bytes(n: usize) -> Vec<u8> {
        let mut s = String::new();
        for i in 0..n {
            s.push_str(&format!(
                "onion-key\n-----BEGIN RSA PUBLIC KEY-----\nMD{i}\n-----END RSA PUBLIC KEY-----\n"
            ));
        }
        s.into_bytes()
    }

    #[test]
    fn s1_journal_then_compact() {
        let dir = TempDir::new().unwrap();
        let mut store = MicrodescStore::new(dir.path());
        let bytes = sample_bytes(50);
        let added = store
            .add_bytes(&bytes, BodyLocation::Nowhere, false, Some(SystemTime::now()), None)
            .unwrap();
        assert_eq!(added.len(), 50);
        assert!(store.journal_bytes > 0);
        for digest in &added {
            let entry = store.lookup(digest).unwrap();
            assert_eq!(entry.body.kind(), "in_journal");
        }

        store.rebuild(true).unwrap();
        assert_eq!(store.journal_bytes, 0);
        assert_eq!(store.len(), 50);
        for digest in &added {
            let entry = store.lookup(digest).unwrap();
            assert_eq!(entry.body.kind(), "in_cache");
        }
    }

    #[test]
    fn s2_duplicate_merge_raises_last_listed() {
        let dir = TempDir::new().unwrap();
        let mut store = MicrodescStore::new(dir.path());
        let bytes = sample_bytes(1);
        let t1 = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1000);
        let t2 = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(2000);

        let added = store
            .add_bytes(&bytes, BodyLocation::Nowhere, false, Some(t1), None)
            .unwrap();
        let digest = added[0];
        store
            .add_bytes(&bytes, BodyLocation::Nowhere, false, Some(t2), None)
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&digest).unwrap().last_listed, t2);
    }

    #[test]
    fn journal_under_threshold_never_rebuilds() {
        let dir = TempDir::new().unwrap();
        let mut store = MicrodescStore::new(dir.path());
        store.journal_bytes = REBUILD_MIN_JOURNAL - 1;
        store.bytes_dropped = u64::MAX / 4;
        assert!(!store.should_rebuild(0));
    }

    #[test]
    fn clean_is_noop_without_reasonably_live_consensus() {
        let dir = TempDir::new().unwrap();
        let mut store = MicrodescStore::new(dir.path());
        let bytes = sample_bytes(1);
        let added = store
            .add_bytes(&bytes, BodyLocation::Nowhere, false, Some(SystemTime::UNIX_EPOCH), None)
            .unwrap();
        store.clean(SystemTime::now(), false, false);
        assert!(store.lookup(&added[0]).is_some());
    }
}
