//! General helpers used by Tor: small utilities with no other natural
//! home, shared across multiple arti crates.

#![allow(clippy::exhaustive_structs)]

pub mod retry;

use std::fmt;

/// Formats `bytes` as a lowercase hex string, for fingerprints and
/// digests that appear in log lines and diagnostics.
pub fn hex_str(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// A wrapper that implements `Debug` by delegating to `Display`, for
/// types (like digests) whose useful debug representation is the same
/// as their display representation.
pub struct DisplayDebug<T>(pub T);

impl<T: fmt::Display> fmt::Debug for DisplayDebug<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_str_is_lowercase() {
        assert_eq!(hex_str(&[0xAB, 0x01]), "ab01");
    }
}
