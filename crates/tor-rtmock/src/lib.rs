//! A mock [`Runtime`](tor_rtcompat::Runtime) with a virtual, manually
//! advanced clock.
//!
//! Tests of the download scheduler need to assert things like "after
//! we advance seven hours, a retry becomes due" without actually
//! sleeping seven hours. [`MockSleepRuntime`] provides that: its
//! `now()` and pending sleeps are driven entirely by
//! [`MockSleepRuntime::advance`].

use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tor_rtcompat::{SleepProvider, SpawnBlocking};

/// Shared virtual-clock state.
struct Inner {
    /// The current virtual time.
    now: Instant,
    /// Pending wakeups, ordered by the instant they should fire.
    pending: BinaryHeap<Reverse<(Instant, u64)>>,
    /// Wakers registered against each pending entry, by sequence number.
    wakers: std::collections::HashMap<u64, Waker>,
    /// Next sequence number to hand out.
    next_id: u64,
}

/// A runtime whose clock only moves when told to.
#[derive(Clone)]
pub struct MockSleepRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockSleepRuntime {
    fn default() -> Self {
        MockSleepRuntime {
            inner: Arc::new(Mutex::new(Inner {
                now: Instant::now(),
                pending: BinaryHeap::new(),
                wakers: std::collections::HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

impl MockSleepRuntime {
    /// Create a new mock runtime, with its virtual clock starting at
    /// the real current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the virtual clock forward by `d`, waking any sleeper whose
    /// deadline has now passed.
    pub fn advance(&self, d: Duration) {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.now += d;
        let now = inner.now;
        let mut ready = Vec::new();
        while let Some(Reverse((when, id))) = inner.pending.peek().copied() {
            if when > now {
                break;
            }
            inner.pending.pop();
            ready.push(id);
        }
        for id in ready {
            if let Some(w) = inner.wakers.remove(&id) {
                w.wake();
            }
        }
    }
}

/// The future returned by [`MockSleepRuntime::sleep`].
pub struct MockSleep {
    /// Runtime this sleep belongs to.
    rt: MockSleepRuntime,
    /// The instant at which this sleep becomes ready.
    until: Instant,
    /// Sequence number used to find/remove our waker.
    id: Option<u64>,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.rt.inner.lock().expect("poisoned");
        if inner.now >= self.until {
            return Poll::Ready(());
        }
        let id = *self.id.get_or_insert_with(|| {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.pending.push(Reverse((self.until, id)));
            id
        });
        inner.wakers.insert(id, cx.waker().clone());
        Poll::Pending
    }
}

impl SleepProvider for MockSleepRuntime {
    type SleepFuture = MockSleep;

    fn sleep(&self, duration: Duration) -> Self::SleepFuture {
        let inner = self.inner.lock().expect("poisoned");
        MockSleep {
            rt: self.clone(),
            until: inner.now + duration,
            id: None,
        }
    }

    fn now(&self) -> Instant {
        self.inner.lock().expect("poisoned").now
    }
}

impl SpawnBlocking for MockSleepRuntime {
    fn spawn_obj(&self, future: BoxFuture<'static, ()>) {
        // Tests drive futures to completion by hand via an executor
        // like `futures::executor::block_on`; nothing here needs to
        // run work in the background, so we just detach and drop it
        // if it's never polled.
        drop(future);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advance_wakes_sleepers() {
        let rt = MockSleepRuntime::new();
        let start = rt.now();
        let mut sleep = rt.sleep(Duration::from_secs(10));
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(
            std::pin::Pin::new(&mut sleep).poll(&mut cx),
            Poll::Pending
        ));
        rt.advance(Duration::from_secs(10));
        assert!(matches!(
            std::pin::Pin::new(&mut sleep).poll(&mut cx),
            Poll::Ready(())
        ));
        assert_eq!(rt.now(), start + Duration::from_secs(10));
    }
}
