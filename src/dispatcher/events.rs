//! Broadcast events: `on_container_mounted` and the signature-error event.
//!
//! A minimal multi-subscriber broadcast, protected by a mutex during
//! broadcast per §5 ("signature-error listeners: protected by a mutex
//! during broadcast"). This crate has no async runtime to hand an `Event<T>`
//! type from, so subscribers are plain callbacks; a consumer that wants a
//! channel/future can bridge with one line in its callback.

use std::sync::Mutex;

use crate::chunk_id::ChunkId;

/// One mounted container, as reported to `on_container_mounted` subscribers.
#[derive(Debug, Clone)]
pub struct MountedContainerInfo {
    pub container_id: u64,
    pub short_name: String,
}

/// A per-block signature mismatch, as reported to `get_signature_error_event`
/// subscribers and embedded in the failing requests' `SignatureError`.
#[derive(Debug, Clone)]
pub struct SignatureErrorInfo {
    pub container_short_name: String,
    pub block_index: u32,
    pub chunk_id: Option<ChunkId>,
}

type Listener<T> = Box<dyn Fn(&T) + Send + 'static>;

/// A broadcast point subscribers can attach to; firing calls every attached
/// listener in registration order under the listeners' mutex.
pub struct Event<T> {
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    pub fn fire(&self, value: &T) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fire_calls_every_subscriber() {
        let event: Event<u32> = Event::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        event.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        event.subscribe(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        event.fire(&42);
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn no_subscribers_is_a_no_op() {
        let event: Event<u32> = Event::new();
        event.fire(&1);
        assert_eq!(event.subscriber_count(), 0);
    }
}
