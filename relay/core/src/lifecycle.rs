//! Host Lifecycle
//!
//! The host environment can tear down the UI context at any moment (code
//! reload, mode switch, process shutdown). [`HostLifecycle`] broadcasts those
//! teardowns so an active coordinator can force-interrupt its session before
//! the context disappears.
//!
//! A coordinator subscribes when a session starts and drops its receiver when
//! the session ends, so an idle coordinator never reacts to a teardown.

use std::fmt;

use tokio::sync::broadcast;

/// Capacity of the teardown channel; teardowns are rare
const TEARDOWN_CHANNEL_CAPACITY: usize = 16;

/// Why the host is tearing down the UI context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// Code is being reloaded
    DomainReload,
    /// The host is switching modes
    ModeChange,
    /// The process is shutting down
    Shutdown,
}

impl TeardownReason {
    /// Notice shown to the user when a session is cut short for this reason
    #[must_use]
    pub fn notice(self) -> &'static str {
        match self {
            Self::DomainReload => "\n\n[Response interrupted: the host is reloading]",
            Self::ModeChange => "\n\n[Response interrupted: the host changed mode]",
            Self::Shutdown => "\n\n[Response interrupted: shutting down]",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DomainReload => write!(f, "domain reload"),
            Self::ModeChange => write!(f, "mode change"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A teardown notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Teardown {
    /// Why the host is tearing down
    pub reason: TeardownReason,
    /// Custom notice; falls back to [`TeardownReason::notice`]
    pub notice: Option<String>,
}

impl Teardown {
    /// Notice text to show the user
    #[must_use]
    pub fn notice_text(&self) -> &str {
        self.notice
            .as_deref()
            .unwrap_or_else(|| self.reason.notice())
    }
}

/// Broadcasts host teardowns to subscribed coordinators
#[derive(Clone, Debug)]
pub struct HostLifecycle {
    tx: broadcast::Sender<Teardown>,
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle {
    /// Create a lifecycle monitor with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TEARDOWN_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to teardowns; dropping the receiver unsubscribes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Teardown> {
        self.tx.subscribe()
    }

    /// Announce a teardown with the default notice
    ///
    /// Returns the number of subscribers notified.
    pub fn signal(&self, reason: TeardownReason) -> usize {
        self.send(Teardown {
            reason,
            notice: None,
        })
    }

    /// Announce a teardown with a custom notice
    pub fn signal_with_notice(&self, reason: TeardownReason, notice: impl Into<String>) -> usize {
        self.send(Teardown {
            reason,
            notice: Some(notice.into()),
        })
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, teardown: Teardown) -> usize {
        tracing::info!(reason = %teardown.reason, "Host teardown signalled");
        // No subscribers means no active session
        self.tx.send(teardown).unwrap_or(0)
    }
}
