//! Deterministic disposal of GPU-backed resources.
//!
//! Every CPU resource owns a [`DisposeSignal`]. A renderer subscribes a
//! channel sender the first time it creates GPU state for the resource. When
//! the application calls `dispose()`, the signal sends one [`DisposeEvent`] to
//! each subscriber and forgets them, so a second `dispose()` is a no-op.
//!
//! Renderers drain their receiver between frames and release the matching
//! records. Disposal during a frame is not supported.

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::ResourceId;

/// Which resource was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisposeEvent {
    Geometry(ResourceId),
    Material(ResourceId),
    Texture(ResourceId),
    RenderTarget(ResourceId),
}

#[derive(Debug, Default)]
pub struct DisposeSignal {
    subscribers: Mutex<SmallVec<[(u64, flume::Sender<DisposeEvent>); 1]>>,
}

impl DisposeSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` under `subscriber` (a renderer id).
    ///
    /// Subscribing twice with the same id keeps a single entry, so records
    /// rebuilt after a context loss do not produce duplicate events.
    pub fn subscribe(&self, subscriber: u64, sender: &flume::Sender<DisposeEvent>) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.iter().any(|(id, _)| *id == subscriber) {
            return;
        }
        subscribers.push((subscriber, sender.clone()));
    }

    #[must_use]
    pub fn is_subscribed(&self, subscriber: u64) -> bool {
        self.subscribers.lock().iter().any(|(id, _)| *id == subscriber)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Notifies and drops every subscriber.
    pub fn fire(&self, event: DisposeEvent) {
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        for (id, sender) in subscribers {
            if sender.send(event).is_err() {
                log::debug!("Dispose of {event:?}: renderer {id} already dropped");
            }
        }
    }
}

// Clones of a resource are new resources and start unsubscribed.
impl Clone for DisposeSignal {
    fn clone(&self) -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_once() {
        let (tx, rx) = flume::unbounded();
        let signal = DisposeSignal::new();
        let id = ResourceId::next();

        signal.subscribe(1, &tx);
        signal.subscribe(1, &tx);
        assert_eq!(signal.subscriber_count(), 1);

        signal.fire(DisposeEvent::Texture(id));
        signal.fire(DisposeEvent::Texture(id));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![DisposeEvent::Texture(id)]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = flume::unbounded();
        let signal = DisposeSignal::new();
        signal.subscribe(7, &tx);
        drop(rx);

        signal.fire(DisposeEvent::Geometry(ResourceId::next()));
        assert_eq!(signal.subscriber_count(), 0);
    }
}
