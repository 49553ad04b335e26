//! Events emitted on the control channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use event_listener::Event;

use crate::netstatus::ConsensusFlavor;

/// An event emitted when the directory cache's state changes in a way
/// a controller or other subsystem might care about.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DirEvent {
    /// A new consensus became current. Corresponds to the `NEWCONSENSUS`
    /// and `NS` control-port events.
    NewConsensus(ConsensusFlavor),
    /// A consensus document of any kind (current or otherwise) arrived
    /// and was processed, successfully or not. Corresponds to
    /// `CONSENSUS_ARRIVED`.
    ConsensusArrived,
    /// A document claimed a validity window that starts more than
    /// `EARLY_CONSENSUS_NOTICE_SKEW` in the future. Corresponds to
    /// `CLOCK_SKEW`.
    ClockSkew,
}

/// Publishes [`DirEvent`]s to any number of listeners.
///
/// Grounded in the same publish/subscribe shape as a broadcast
/// channel, but built directly on `event-listener` so that a listener
/// only has to wake up and re-check a generation counter, rather than
/// buffer every event it might have missed.
pub struct DirEventPublisher {
    /// Bumped on every publish.
    generation: AtomicUsize,
    /// The most recently published event, if any.
    last: std::sync::Mutex<Option<DirEvent>>,
    /// Notifies listeners that `generation`/`last` changed.
    notify: Event,
}

impl Default for DirEventPublisher {
    fn default() -> Self {
        DirEventPublisher {
            generation: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
            notify: Event::new(),
        }
    }
}

impl DirEventPublisher {
    /// Construct a new, empty publisher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish `event` to every current and future listener.
    pub fn publish(&self, event: DirEvent) {
        *self.last.lock().expect("poisoned") = Some(event);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify(usize::MAX);
    }

    /// Return a listener that will be notified of every subsequent
    /// publish.
    pub fn subscribe(self: &Arc<Self>) -> DirEventListener {
        DirEventListener {
            publisher: Arc::clone(self),
            seen_generation: self.generation.load(Ordering::SeqCst),
        }
    }
}

/// A handle that can wait for the next [`DirEvent`].
pub struct DirEventListener {
    /// The publisher we're attached to.
    publisher: Arc<DirEventPublisher>,
    /// The generation we've already observed.
    seen_generation: usize,
}

impl DirEventListener {
    /// Wait for, and return, the next published event.
    pub async fn next(&mut self) -> DirEvent {
        loop {
            let current = self.publisher.generation.load(Ordering::SeqCst);
            if current != self.seen_generation {
                self.seen_generation = current;
                if let Some(ev) = self.publisher.last.lock().expect("poisoned").clone() {
                    return ev;
                }
            }
            let listen = self.publisher.notify.listen();
            if self.publisher.generation.load(Ordering::SeqCst) != current {
                continue;
            }
            listen.await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn publish_is_observed() {
        let publisher = DirEventPublisher::new();
        let mut listener = publisher.subscribe();
        publisher.publish(DirEvent::ConsensusArrived);
        let fut = listener.next();
        let event = futures::executor::block_on(fut);
        assert!(matches!(event, DirEvent::ConsensusArrived));
    }
}
