//! Core traits implemented by every supported runtime.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::task::SpawnBlocking;

/// Trait for a runtime that knows how to sleep.
///
/// This is separate from [`Runtime`] itself so that code that only
/// needs timers (like a retry scheduler) can take a smaller bound.
pub trait SleepProvider {
    /// A future returned by [`sleep`](SleepProvider::sleep).
    type SleepFuture: Future<Output = ()> + Send + 'static;

    /// Return a future that will be ready after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Self::SleepFuture;

    /// Return the current time, according to this runtime's clock.
    ///
    /// Implementations may use a monotonic clock that drifts from
    /// wall-clock time; callers that need wall-clock time for a
    /// directory document should use [`std::time::SystemTime::now`]
    /// directly instead.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A runtime capable of everything the directory cache needs: sleeping
/// and spawning background tasks.
pub trait Runtime: SpawnBlocking + SleepProvider + Clone + Send + Sync + 'static {}

impl<T> Runtime for T where T: SpawnBlocking + SleepProvider + Clone + Send + Sync + 'static {}
