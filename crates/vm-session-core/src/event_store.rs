//! Broadcast + history store for session events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::SessionEvent;

/// Default history size limit (entries).
const HISTORY_ENTRIES: usize = 1024;

/// Event store with broadcast and history support.
///
/// Late observers receive history first, then live events.
pub struct EventStore {
    history: RwLock<VecDeque<SessionEvent>>,
    capacity: usize,
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_ENTRIES)
    }

    /// Create a store keeping at most `capacity` events of history.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(32))),
            capacity: capacity.max(1),
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: SessionEvent) {
        let _ = self.sender.send(event.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Most recent status line.
    #[must_use]
    pub fn latest_status(&self) -> Option<String> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find_map(SessionEvent::status_text)
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent> {
        // Subscribe before snapshotting so nothing falls between the two.
        let rx = self.get_receiver();
        let history = self.get_history();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of status lines (history first).
    #[must_use]
    pub fn status_stream(&self) -> futures::stream::BoxStream<'static, String> {
        self.history_plus_stream()
            .filter_map(|event| async move { event.status_text() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DisplayEvent, SessionState};

    fn changed(from: SessionState, to: SessionState) -> SessionEvent {
        SessionEvent::StateChanged { from, to }
    }

    #[test]
    fn test_history_is_bounded() {
        let store = EventStore::with_capacity(2);
        store.push(changed(SessionState::Idle, SessionState::Starting));
        store.push(changed(SessionState::Starting, SessionState::Connecting));
        store.push(changed(SessionState::Connecting, SessionState::Connected));

        let history = store.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], changed(SessionState::Starting, SessionState::Connecting));
    }

    #[test]
    fn test_latest_status_skips_silent_events() {
        let store = EventStore::new();
        store.push(changed(SessionState::Idle, SessionState::Starting));
        store.push(SessionEvent::SessionIssued {
            session_id: "abc".into(),
        });
        assert_eq!(store.latest_status().as_deref(), Some("Starting..."));
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = EventStore::new();
        store.push(changed(SessionState::Idle, SessionState::Starting));

        let mut stream = store.status_stream();
        store.push(SessionEvent::Display(DisplayEvent::Connecting));

        assert_eq!(stream.next().await.as_deref(), Some("Starting..."));
        assert_eq!(stream.next().await.as_deref(), Some("Handshaking..."));
    }
}
