//! Event Sinks
//!
//! A sink is the UI-side consumer of a session. The coordinator calls it only
//! from the context that awaits [`Coordinator::start_streaming`] (or calls
//! [`Coordinator::force_interrupt`]), never from the relay task.
//!
//! Callbacks run while the coordinator holds the sink. Calling back into the
//! coordinator's `force_interrupt` from inside a callback deadlocks; use
//! `stop_streaming` instead, which only sets the cancel token.
//!
//! [`Coordinator::start_streaming`]: crate::Coordinator::start_streaming
//! [`Coordinator::force_interrupt`]: crate::Coordinator::force_interrupt

use tokio::sync::mpsc;

use crate::events::SessionId;

/// UI-side consumer of session events
pub trait EventSink: Send {
    /// A session has started
    fn on_session_started(&mut self, id: SessionId);

    /// A chunk of response text arrived
    fn on_chunk(&mut self, text: &str);

    /// The session finished successfully
    fn on_session_completed(&mut self);

    /// The session failed
    fn on_session_failed(&mut self, message: &str);

    /// The session was cancelled by the consumer
    fn on_session_cancelled(&mut self);

    /// The host forced the session down
    ///
    /// Defaults to appending the notice as text and reporting a cancellation.
    fn on_session_interrupted(&mut self, notice: &str) {
        self.on_chunk(notice);
        self.on_session_cancelled();
    }
}

/// Notification forwarded by [`ChannelSink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// Session started
    Started(SessionId),
    /// Chunk text
    Chunk(String),
    /// Session completed
    Completed,
    /// Session failed with a message
    Failed(String),
    /// Session interrupted with a notice
    Interrupted(String),
    /// Session cancelled
    Cancelled,
}

/// Sink that forwards every callback over an unbounded channel
///
/// Useful when the UI lives on its own task, and as a recording sink in tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events are forwarded to
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Sink receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_session_started(&mut self, id: SessionId) {
        self.forward(SinkEvent::Started(id));
    }

    fn on_chunk(&mut self, text: &str) {
        self.forward(SinkEvent::Chunk(text.to_string()));
    }

    fn on_session_completed(&mut self) {
        self.forward(SinkEvent::Completed);
    }

    fn on_session_failed(&mut self, message: &str) {
        self.forward(SinkEvent::Failed(message.to_string()));
    }

    fn on_session_cancelled(&mut self) {
        self.forward(SinkEvent::Cancelled);
    }

    fn on_session_interrupted(&mut self, notice: &str) {
        self.forward(SinkEvent::Interrupted(notice.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TextSink {
        text: String,
        cancelled: bool,
    }

    impl EventSink for TextSink {
        fn on_session_started(&mut self, _id: SessionId) {}
        fn on_chunk(&mut self, text: &str) {
            self.text.push_str(text);
        }
        fn on_session_completed(&mut self) {}
        fn on_session_failed(&mut self, _message: &str) {}
        fn on_session_cancelled(&mut self) {
            self.cancelled = true;
        }
    }

    #[test]
    fn test_default_interrupted_appends_notice() {
        let mut sink = TextSink::default();
        sink.on_chunk("partial");
        sink.on_session_interrupted("\n[interrupted]");

        assert_eq!(sink.text, "partial\n[interrupted]");
        assert!(sink.cancelled);
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (mut sink, mut rx) = ChannelSink::new();
        let id = SessionId::new();

        sink.on_session_started(id);
        sink.on_chunk("A");
        sink.on_session_interrupted("stop");

        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Started(id));
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Chunk("A".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkEvent::Interrupted("stop".to_string())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_chunk("ignored");
    }
}
