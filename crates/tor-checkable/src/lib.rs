//! Types to ensure that signed or time-bound data is validated before
//! use.
//!
//! Directory documents (consensuses, authority certificates) come with
//! two kinds of "this can't be trusted yet" state: they may not be
//! signed by enough authorities, and they may be valid only during a
//! certain time window. The traits here turn both checks into types,
//! so that a caller cannot accidentally use an unchecked document: a
//! [`Timebound`] document is checked against the current time, and a
//! [`SelfSigned`]/[`ExternallySigned`] document is checked against the
//! keys that must sign it, before either will hand back the real value.

#![allow(clippy::exhaustive_enums)]

pub mod signed;
pub mod timed;

pub use signed::{ExternallySigned, SelfSigned};
pub use timed::{TimeValidityError, Timebound};
