//! Cancellation Token
//!
//! A one-way latch shared between the coordinator and the producer relay.
//! Starts unset; once [`CancelToken::cancel`] is called it stays set for the
//! rest of the session. A fresh token is created for every session.

use tokio_util::sync::CancellationToken;

/// Cooperative cancellation signal for one streaming session
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Create an unset token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}
