//! Task-spawning abstraction.

use std::future::Future;

/// A runtime that can spawn a future to run in the background.
pub trait SpawnBlocking {
    /// Spawn `future`, running it to completion without blocking the
    /// caller.
    fn spawn_obj(&self, future: futures::future::BoxFuture<'static, ()>);

    /// Spawn `future`, running it to completion without blocking the
    /// caller.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_obj(Box::pin(future));
    }
}
