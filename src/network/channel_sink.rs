//! Tokio channel adapter for Fortress Turns.
//!
//! [`ChannelSink`] implements [`EventSink`] over an unbounded
//! [`tokio::sync::mpsc`] channel. The registry's synchronous broadcast queues
//! events without blocking, and each socket task drains its own receiver and
//! writes to its websocket at its own pace.
//!
//! # Example
//!
//! ```
//! use fortress_turns::network::channel_sink::ChannelSink;
//! use fortress_turns::{EventSink, ServerEvent};
//!
//! let (sink, mut events) = ChannelSink::new();
//! sink.send(ServerEvent::Error { message: "hi".into() }).unwrap();
//! assert!(events.try_recv().is_ok());
//! ```
//!
//! # Feature Flag
//!
//! This module requires the `tokio` feature flag:
//!
//! ```toml
//! [dependencies]
//! fortress-turns = { version = "0.3", features = ["tokio"] }
//! ```

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::network::messages::ServerEvent;
use crate::network::sink::{EventSink, SinkClosed};

/// An [`EventSink`] that forwards into a tokio unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its socket task drains.
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    /// Wraps an existing sender.
    #[must_use]
    pub fn from_sender(tx: UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// Returns `true` once the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: ServerEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).map_err(|_closed| SinkClosed)
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

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        for i in 0..3 {
            sink.send(ServerEvent::Error {
                message: format!("{i}"),
            })
            .unwrap();
        }
        for i in 0..3 {
            match rx.recv().await.unwrap() {
                ServerEvent::Error { message } => assert_eq!(message, format!("{i}")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_dropped_receiver_closes_sink() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(
            sink.send(ServerEvent::Error {
                message: "late".into()
            }),
            Err(SinkClosed)
        );
    }
}
