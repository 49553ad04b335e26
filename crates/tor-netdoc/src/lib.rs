//! Network document formats used by the Tor directory protocol.
//!
//! This crate turns the raw bytes of a microdescriptor, consensus, or
//! authority certificate into the structured types the directory
//! cache operates on. It does not decide *whether* a document should
//! be trusted — quorum-of-signatures checks and time-window checks are
//! the cache core's job — it only decides whether the bytes are
//! well-formed.

#![allow(clippy::exhaustive_structs)]
#![allow(clippy::exhaustive_enums)]

pub mod doc;
mod err;
mod parse;

pub use err::{Error, Pos, Result};
