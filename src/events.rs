//! Listener registration for session and camera events.
//!
//! Each `subscribe` returns a fresh [`ListenerId`]; removal goes through that
//! id, never through comparing callbacks. Listeners run on whichever thread
//! raised the event and must not block for long.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;

use crate::registers::INPUT_COUNT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    /// The session moved to `Invalid` after a transport or protocol failure
    ConnectionLost,
    Disconnected,
    OnlineStarted,
    OnlineStopped,
    /// Indices of the universal inputs whose value changed
    InputValueChanged(Vec<usize>),
}

impl SessionEvent {
    /// Event announcing every input, used as the online-mode baseline.
    pub fn all_inputs_changed() -> Self {
        Self::InputValueChanged((0..INPUT_COUNT).collect())
    }
}

/// One compressed (JPEG) camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    FrameReceived { frame: CameraFrame, first: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct EventHub<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false when `id` was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        // Snapshot so listeners may (un)subscribe from inside the callback.
        let listeners: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl<E: Clone + Send + 'static> EventHub<E> {
    /// Forward events into a channel. The listener is dropped automatically
    /// once the receiver is gone and the next event is emitted.
    pub fn subscribe_channel(self: &Arc<Self>) -> (ListenerId, Receiver<E>) {
        let (tx, rx) = unbounded();
        let hub = Arc::downgrade(self);
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let own_id = Arc::clone(&slot);
        let id = self.subscribe(move |event: &E| {
            if tx.send(event.clone()).is_err() {
                let id = *own_id.lock();
                if let (Some(hub), Some(id)) = (hub.upgrade(), id) {
                    hub.unsubscribe(id);
                }
            }
        });
        *slot.lock() = Some(id);
        (id, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventHub, SessionEvent};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unsubscribe_by_handle() {
        let hub = EventHub::<SessionEvent>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let first = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&hits);
        let second = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_ne!(first, second);

        hub.emit(&SessionEvent::Connected);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(hub.unsubscribe(first));
        assert!(!hub.unsubscribe(first));
        hub.emit(&SessionEvent::Connected);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn channel_listener_detaches_when_receiver_dropped() {
        let hub = Arc::new(EventHub::<SessionEvent>::new());
        let (_, rx) = hub.subscribe_channel();

        hub.emit(&SessionEvent::OnlineStarted);
        assert_eq!(rx.try_recv().ok(), Some(SessionEvent::OnlineStarted));

        drop(rx);
        hub.emit(&SessionEvent::OnlineStopped);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn baseline_event_lists_all_inputs() {
        assert_eq!(
            SessionEvent::all_inputs_changed(),
            SessionEvent::InputValueChanged(vec![0, 1, 2, 3, 4, 5, 6, 7])
        );
    }
}
