//! The in-memory representation of a single cached microdescriptor.

use std::sync::Arc;
use std::time::SystemTime;

use tor_netdoc::doc::microdesc::{Microdesc, MdDigest};

/// Where a microdescriptor's body bytes currently live.
///
/// This is a tagged union rather than a raw pointer plus an enum flag
/// so that the type system — not a runtime check — prevents ever
/// treating an mmap interior as something that can be individually
/// freed.
#[derive(Clone, Debug)]
pub enum MdBody {
    /// The body is a byte range inside the store's current mmap, at
    /// `offset` from the start of the mapped file.
    InCache {
        /// A handle to the mmap this body lives inside, kept alive as
        /// long as any `InCache` body references it.
        mmap: Arc<crate::mds::CacheMap>,
        /// Offset of the first body byte within the mapped file.
        offset: usize,
    },
    /// The body is an owned buffer that has also been appended to the
    /// journal, at `offset` within the journal file.
    InJournal {
        /// The body bytes.
        buf: Arc<[u8]>,
        /// Offset within the journal file (for diagnostics only; the
        /// buffer itself is authoritative).
        offset: u64,
    },
    /// The body is an owned buffer with no on-disk presence at all.
    Heap {
        /// The body bytes.
        buf: Arc<[u8]>,
    },
}

impl MdBody {
    /// Borrow the body's bytes, regardless of backing.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MdBody::InCache { mmap, offset } => {
                let all = mmap.as_bytes();
                &all[*offset..]
            }
            MdBody::InJournal { buf, .. } => buf,
            MdBody::Heap { buf } => buf,
        }
    }

    /// A human-readable name for this backing, for logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            MdBody::InCache { .. } => "in_cache",
            MdBody::InJournal { .. } => "in_journal",
            MdBody::Heap { .. } => "nowhere",
        }
    }
}

/// A single cached microdescriptor: its digest, its body, and the
/// bookkeeping fields the store needs.
#[derive(Clone, Debug)]
pub struct MicrodescEntry {
    /// The SHA-256 digest of `body`'s exact bytes (up to `body_len`).
    pub digest: MdDigest,
    /// Length of the canonical body, in bytes.
    pub body_len: usize,
    /// Where those bytes currently live.
    pub body: MdBody,
    /// The most recent consensus `valid_after` that referenced this
    /// microdescriptor. Monotonically non-decreasing.
    pub last_listed: SystemTime,
    /// If true, this entry must never be written to disk.
    pub no_save: bool,
    /// Number of node-table entries currently pointing at this entry.
    /// A consistency aid, not a reference count: the store always owns
    /// the entry outright.
    pub held_by_nodes: u32,
    /// The md's other parsed fields, opaque to the store itself.
    pub parsed: Microdesc,
}

impl MicrodescEntry {
    /// Return this entry's body as a slice of exactly `body_len` bytes.
    pub fn body_bytes(&self) -> &[u8] {
        &self.body.as_bytes()[..self.body_len]
    }

    /// Return the `@last-listed` annotation line for this entry, if
    /// `last_listed` is set to anything after the epoch.
    pub fn annotation(&self) -> String {
        let datetime: humantime::Timestamp = self.last_listed.into();
        format!("@last-listed {}\n", format_iso(datetime))
    }
}

/// Render a timestamp the way the `@last-listed` annotation expects:
/// `YYYY-MM-DD HH:MM:SS`, not full RFC 3339.
fn format_iso(ts: humantime::Timestamp) -> String {
    let s = ts.to_string();
    // humantime renders as `2023-01-01T00:00:00Z`; the on-disk
    // annotation grammar wants a space instead of `T` and no `Z`.
    s.replacen('T', " ", 1).trim_end_matches('Z').to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn heap_body_round_trips() {
        let buf: Arc<[u8]> = Arc::from(&b"onion-key\nhello"[..]);
        let body = MdBody::Heap { buf: buf.clone() };
        assert_eq!(body.as_bytes(), &buf[..]);
        assert_eq!(body.kind(), "nowhere");
    }
}
