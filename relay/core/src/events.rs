//! Stream Events
//!
//! Two event vocabularies live here:
//!
//! - [`RawEvent`]: what a producer yields. Mirrors the agent's NDJSON frames
//!   (`chunk`, `complete`, `error`).
//! - [`StreamEvent`]: what the coordinator queues and dispatches. Adds the
//!   coordinator-originated terminals `Interrupted` and `Cancelled`.
//!
//! # Terminal Events
//!
//! `Complete`, `Error`, `Interrupted` and `Cancelled` end a session. Exactly
//! one of them reaches the sink per session; anything arriving after the first
//! is dropped by the coordinator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionState;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a streaming session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ============================================================================
// Producer Events
// ============================================================================

/// Event yielded by a producer adapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// A fragment of the response
    Chunk {
        /// Fragment text
        content: String,
    },
    /// The producer finished successfully
    Complete,
    /// The producer reported a failure
    Error {
        /// Failure description
        error: String,
    },
}

impl RawEvent {
    /// Create a chunk event
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    /// Create an error event
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }
}

impl From<RawEvent> for StreamEvent {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::Chunk { content } => Self::Chunk { text: content },
            RawEvent::Complete => Self::Complete,
            RawEvent::Error { error } => Self::Error { message: error },
        }
    }
}

// ============================================================================
// Coordinator Events
// ============================================================================

/// Event buffered in the chunk queue and dispatched to the UI sink
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of the response
    Chunk {
        /// Fragment text
        text: String,
    },
    /// Terminal: the producer finished successfully
    Complete,
    /// Terminal: the producer failed
    Error {
        /// Short human-readable message
        message: String,
    },
    /// Terminal: the host forced the session down
    Interrupted {
        /// User-facing notice appended to the output
        notice: String,
    },
    /// Terminal: the consumer cancelled the session
    Cancelled,
}

impl StreamEvent {
    /// Create a chunk event
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends a session
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// Session state entered when this event is dispatched as the terminal
    #[must_use]
    pub fn terminal_state(&self) -> Option<SessionState> {
        match self {
            Self::Chunk { .. } => None,
            Self::Complete => Some(SessionState::Completed),
            Self::Error { .. } => Some(SessionState::Failed),
            Self::Interrupted { .. } => Some(SessionState::Interrupted),
            Self::Cancelled => Some(SessionState::Cancelled),
        }
    }

    /// Short label for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
            Self::Interrupted { .. } => "interrupted",
            Self::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Failure Classification
// ============================================================================

/// Coarse category of a failure message, for rendering hints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The response timed out
    Timeout,
    /// TLS / certificate problem reaching the model provider
    Tls,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Classify a failure message
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate")
        {
            Self::Tls
        } else {
            Self::Other
        }
    }

    /// Suggestions shown to the user alongside the failure
    #[must_use]
    pub fn hints(self) -> &'static [&'static str] {
        match self {
            Self::Timeout => &[
                "Try simplifying the request",
                "Check the network connection",
                "Try again later",
            ],
            Self::Tls => &[
                "Check the network connection",
                "Update the system certificates",
                "Check firewall or proxy settings",
            ],
            Self::Other => &[],
        }
    }
}
