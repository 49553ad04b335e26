//! Compatibility layer for asynchronous runtimes.
//!
//! The directory cache's event loop (see the `tick` driver in
//! `tor-dirmgr`) needs exactly two things from whatever async runtime
//! eventually hosts it: a way to sleep until a future instant, and a
//! way to spawn background work. [`Runtime`] names that minimal
//! surface so the cache core never depends on tokio or async-std
//! directly. Connecting to a directory cache or authority over the
//! network is a separate, explicitly out-of-scope concern handled by
//! the downloader.

#![allow(clippy::exhaustive_structs)]
#![allow(clippy::exhaustive_enums)]

mod task;
mod timer;
mod traits;

pub use task::SpawnBlocking;
pub use timer::{SleepProviderExt, Timeout, TimeoutError};
pub use traits::{Runtime, SleepProvider};
