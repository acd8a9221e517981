//! Session Management
//!
//! A session is one request/response streaming cycle. The coordinator owns
//! it exclusively; sinks only ever see its effects through dispatched events.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Starting ──► Streaming ──► Completed | Failed | Interrupted | Cancelled
//!              │                            ▲
//!              └────────────────────────────┘
//! ```
//!
//! `Starting` may end directly (startup failure, cancel before the first
//! chunk, empty response). Terminal states never change again.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::events::SessionId;

/// Lifecycle state of a streaming session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No session active
    #[default]
    Idle,
    /// Producer invocation in flight, no chunk relayed yet
    Starting,
    /// At least one chunk relayed, producer still active
    Streaming,
    /// Terminal: producer finished successfully
    Completed,
    /// Terminal: producer failed
    Failed,
    /// Terminal: forced down by the host
    Interrupted,
    /// Terminal: cancelled by the consumer
    Cancelled,
}

impl SessionState {
    /// Whether this is a terminal state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Interrupted | Self::Cancelled
        )
    }

    /// Whether a session in this state is still running
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Streaming)
    }

    /// Whether the state machine allows moving to `next`
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        match self {
            Self::Idle => next == Self::Starting,
            Self::Starting => next == Self::Streaming || next.is_terminal(),
            Self::Streaming => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Interrupted | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Throughput statistics for one session
#[derive(Clone, Debug)]
pub struct StreamStats {
    /// Chunks dispatched to the sink
    pub chunks: u64,
    /// Characters dispatched to the sink
    pub characters: usize,
    /// When the session started
    pub started_at: Instant,
    /// When the terminal event was dispatched
    pub finished_at: Option<Instant>,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            chunks: 0,
            characters: 0,
            started_at: Instant::now(),
            finished_at: None,
        }
    }
}

impl StreamStats {
    /// Record a dispatched chunk
    pub fn record_chunk(&mut self, text: &str) {
        self.chunks = self.chunks.saturating_add(1);
        self.characters = self.characters.saturating_add(text.chars().count());
    }

    /// Mark the session finished
    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Instant::now());
        }
    }

    /// Time from start to finish (or to now while running)
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// Average chunks per second
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn chunks_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.chunks as f64 / secs
        } else {
            0.0
        }
    }

    /// Average characters per second
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn chars_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.characters as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunks: {}, chars: {}, elapsed: {:.1}s, rate: {:.1} chars/s",
            self.chunks,
            self.characters,
            self.elapsed().as_secs_f64(),
            self.chars_per_second()
        )
    }
}

// ============================================================================
// Session
// ============================================================================

/// One streaming request/response cycle
#[derive(Clone, Debug)]
pub struct Session {
    /// Unique session ID
    id: SessionId,
    /// Current lifecycle state
    state: SessionState,
    /// First-wins terminal latch, set the moment a terminal event is accepted
    completed: bool,
    /// Throughput statistics
    stats: StreamStats,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a new idle session
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            completed: false,
            stats: StreamStats::default(),
        }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether a terminal event has been accepted
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Session statistics
    #[must_use]
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Move to `next` if the state machine allows it
    ///
    /// Returns `false` (and leaves the state untouched) otherwise.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                session = %self.id,
                from = %self.state,
                to = %next,
                "Rejected session transition"
            );
            return false;
        }
        if self.state == SessionState::Idle {
            self.stats = StreamStats::default();
        }
        self.state = next;
        true
    }

    /// Record a chunk about to be dispatched; promotes `Starting` to `Streaming`
    ///
    /// Returns `false` if the session already accepted a terminal event.
    pub fn accept_chunk(&mut self, text: &str) -> bool {
        if self.completed {
            return false;
        }
        self.transition(SessionState::Streaming);
        self.stats.record_chunk(text);
        true
    }

    /// Latch the terminal state
    ///
    /// Returns `false` if a terminal event was already accepted; the first one
    /// wins.
    pub fn accept_terminal(&mut self, state: SessionState) -> bool {
        if self.completed || !state.is_terminal() {
            return false;
        }
        self.completed = true;
        self.state = state;
        self.stats.finish();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use SessionState::*;

        assert!(Idle.can_transition_to(Starting));
        assert!(!Idle.can_transition_to(Streaming));
        assert!(Starting.can_transition_to(Streaming));
        assert!(Starting.can_transition_to(Cancelled));
        assert!(Streaming.can_transition_to(Completed));
        assert!(!Streaming.can_transition_to(Starting));
        for terminal in [Completed, Failed, Interrupted, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Streaming));
            assert!(!terminal.can_transition_to(Idle));
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.transition(SessionState::Starting));
        assert!(session.accept_chunk("Hi"));
        assert_eq!(session.state(), SessionState::Streaming);

        assert!(session.accept_terminal(SessionState::Completed));
        assert!(session.is_terminal());
        assert!(session.is_completed());
        assert_eq!(session.stats().chunks, 1);
        assert!(session.stats().finished_at.is_some());
    }

    #[test]
    fn test_first_terminal_wins() {
        let mut session = Session::new();
        session.transition(SessionState::Starting);

        assert!(session.accept_terminal(SessionState::Completed));
        assert!(!session.accept_terminal(SessionState::Failed));
        assert!(!session.accept_chunk("late"));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.stats().chunks, 0);
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut session = Session::new();
        assert!(!session.transition(SessionState::Streaming));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_stats_counts_characters() {
        let mut stats = StreamStats::default();
        stats.record_chunk("héllo");
        stats.record_chunk(", ");
        stats.finish();

        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.characters, 7);
        assert!(stats.to_string().starts_with("chunks: 2, chars: 7"));
    }

    #[test]
    fn test_stats_counters_saturate() {
        let mut stats = StreamStats {
            chunks: u64::MAX,
            characters: usize::MAX,
            ..StreamStats::default()
        };
        stats.record_chunk("more");

        assert_eq!(stats.chunks, u64::MAX);
        assert_eq!(stats.characters, usize::MAX);
    }
}
