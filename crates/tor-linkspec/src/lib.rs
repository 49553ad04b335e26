//! Parts of the Tor protocol that indicate specific relays on the
//! network.
//!
//! A routerstatus entry in a consensus names a relay by one or more
//! identities; this crate's [`RelayId`]/[`RelayIdType`] abstract over
//! those identities so that node-linkage code can index relays
//! uniformly regardless of which identity types a given consensus
//! method carries.

#![allow(clippy::exhaustive_enums)]

mod ids;

pub use ids::{RelayId, RelayIdRef, RelayIdType};
