use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::network::messages::{ChatEntry, ServerEvent};
use crate::view::View;

/// The transport went away; the event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event sink is closed")
    }
}

impl std::error::Error for SinkClosed {}

/// This [`EventSink`] trait is used to push outbound events to one client's
/// transport, whatever it is (a websocket task, a channel, a test buffer).
///
/// `send` must not block: the registry calls it while holding the game's lock,
/// so every viewer of a game is sent its new view before the next action on
/// that game is evaluated. Queue the event and return.
pub trait EventSink: Send + Sync {
    /// Queues `event` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] if the transport has gone away. The registry
    /// reports this and carries on; the connection is removed by `disconnect`.
    fn send(&self, event: ServerEvent) -> Result<(), SinkClosed>;
}

/// An [`EventSink`] that records everything it is sent. Useful in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ServerEvent>>,
    closed: AtomicBool,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns all events received so far.
    pub fn take(&self) -> Vec<ServerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// The most recent `state` event's view.
    #[must_use]
    pub fn last_view(&self) -> Option<View> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ServerEvent::State { view, .. } => Some(view.clone()),
            _ => None,
        })
    }

    /// The most recent `error` event's message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ServerEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
    }

    /// Every chat entry delivered, in order.
    #[must_use]
    pub fn chat_entries(&self) -> Vec<ChatEntry> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Chat { entries, .. } => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Simulates the transport going away: later sends fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl EventSink for CollectingSink {
    fn send(&self, event: ServerEvent) -> Result<(), SinkClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkClosed);
        }
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_records_in_order() {
        let sink = CollectingSink::new();
        sink.send(ServerEvent::Error {
            message: "first".into(),
        })
        .unwrap();
        sink.send(ServerEvent::State {
            view: View::with_prompt("Go."),
            game_over: false,
        })
        .unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.last_error().as_deref(), Some("first"));
        assert_eq!(sink.last_view().unwrap().prompt.as_deref(), Some("Go."));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_closed_sink_rejects() {
        let sink = CollectingSink::new();
        sink.close();
        assert_eq!(
            sink.send(ServerEvent::Error {
                message: "x".into()
            }),
            Err(SinkClosed)
        );
        assert!(sink.is_empty());
    }
}
