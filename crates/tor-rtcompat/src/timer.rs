//! Helpers built on top of [`SleepProvider`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};

use crate::traits::SleepProvider;

/// An error returned when a [`SleepProviderExt::timeout`] future fires
/// before the wrapped future completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("timed out")]
pub struct TimeoutError;

/// A future returned by [`SleepProviderExt::timeout`].
pub struct Timeout<F> {
    /// The underlying future.
    inner: F,
}

impl<F> Timeout<F> {
    /// Unwrap the inner future, discarding the timeout behavior.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: fmt::Debug> fmt::Debug for Timeout<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout").field("inner", &self.inner).finish()
    }
}

/// Extension trait adding `timeout()` to anything implementing
/// [`SleepProvider`].
pub trait SleepProviderExt: SleepProvider {
    /// Run `future`, racing it against a timer of `duration`.
    ///
    /// Returns `Ok(output)` if `future` finished first, or
    /// `Err(TimeoutError)` if the timer fired first.
    fn timeout<F>(
        &self,
        duration: Duration,
        future: F,
    ) -> BoxedTimeoutFuture<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let sleep = self.sleep(duration);
        Box::pin(async move {
            futures::pin_mut!(future);
            match select(future, sleep).await {
                Either::Left((output, _)) => Ok(output),
                Either::Right(_) => Err(TimeoutError),
            }
        })
    }
}

impl<T: SleepProvider + ?Sized> SleepProviderExt for T {}

/// The concrete future type returned by [`SleepProviderExt::timeout`].
pub type BoxedTimeoutFuture<T> =
    std::pin::Pin<Box<dyn Future<Output = Result<T, TimeoutError>> + Send>>;
