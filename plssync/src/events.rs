use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::warn;

use crate::model::{ConnectionStatus, Playlist, SourceId};

/// Handle returned by `add_*_observer`, needed to remove the observer again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type StatusObserver = dyn Fn(&SourceId, ConnectionStatus, &str) + Send + Sync;
pub type ReloadObserver = dyn Fn(&Playlist) + Send + Sync;

/// Callbacks keyed by [`ObserverId`].
///
/// Notification runs on a snapshot taken outside the lock, so an observer may
/// add or remove observers (or disconnect its client) while being called.
pub(crate) struct ObserverList<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ObserverId, Arc<F>)>>,
}

impl<F: ?Sized> ObserverList<F> {
    pub(crate) fn new() -> Self {
        ObserverList {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, observer: Arc<F>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Runs one observer, logging instead of unwinding if it panics.
pub(crate) fn call_observer(kind: &str, source_id: &SourceId, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(source = %source_id, kind, "observer panicked");
    }
}

/// Event delivered to channel subscribers of a source.
#[derive(Clone, Debug)]
pub enum SourceEvent {
    StatusChanged {
        source_id: SourceId,
        status: ConnectionStatus,
        message: String,
    },
    /// A background poll fetched a fresh playlist.
    PlaylistReloaded {
        source_id: SourceId,
        playlist: Playlist,
    },
}

impl SourceEvent {
    pub fn source_id(&self) -> &SourceId {
        match self {
            SourceEvent::StatusChanged { source_id, .. }
            | SourceEvent::PlaylistReloaded { source_id, .. } => source_id,
        }
    }
}

/// Fan-out of events to crossbeam channels.
///
/// Dropped receivers are pruned on the next broadcast.
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<Sender<E>>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        EventBus {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        EventBus {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded::<E>();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn broadcast(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Bus shared by all clients of a registry.
pub type SourceEventBus = EventBus<SourceEvent>;
