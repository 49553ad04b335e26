//! Low level cryptography wrappers used for directory document
//! verification.
//!
//! This is a reference-pack-local trimmed copy of `tor-llcrypto`: it
//! keeps the digest and public-key surface that signature
//! verification and document identification need, and omits the
//! onion-service and relay-only cryptography that the rest of arti
//! carries.

#![allow(clippy::exhaustive_structs)]

pub mod d;
pub mod pk;
