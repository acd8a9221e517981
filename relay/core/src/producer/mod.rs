//! Producer Adapters
//!
//! A producer is whatever actually generates the response: an embedded agent
//! process, a remote service, a script in tests. The coordinator only sees it
//! through [`ProducerAdapter`], which turns one input into a lazy stream of
//! [`RawEvent`]s.
//!
//! # Design Philosophy
//!
//! - Adapters do their blocking work off the UI context; the stream is polled
//!   from the coordinator's background relay task.
//! - Adapters observe the [`CancelToken`] at least between items and should
//!   release resources promptly once it is set.
//! - A stream that ends without `Complete` or `Error` is an implicit
//!   completion.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::events::RawEvent;

mod command;
mod scripted;
mod wire;

pub use command::{AgentCommand, CommandProducer};
pub use scripted::{ScriptStep, ScriptedProducer};
pub use wire::parse_line;

/// Lazy, cancellable sequence of producer events
pub type RawEventStream = BoxStream<'static, Result<RawEvent, ProducerError>>;

/// Errors raised by producer adapters
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The producer could not be started
    #[error("Failed to start agent: {0}")]
    Startup(String),

    /// The stream broke mid-response
    #[error("Stream error: {0}")]
    Stream(String),

    /// One frame could not be understood; the stream continues
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The producer process exited unsuccessfully
    #[error("Agent exited with {}", exit_label(.code))]
    Exited {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
    },

    /// The producer observed cancellation and stopped
    #[error("Cancelled")]
    Cancelled,

    /// I/O failure talking to the producer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProducerError {
    /// Whether this error ends the session
    ///
    /// Only [`ProducerError::MalformedEvent`] is recoverable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedEvent(_))
    }
}

#[allow(clippy::ref_option)]
fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Source of response streams
///
/// Implementations must be shareable across tasks: the coordinator hands an
/// `Arc` of the adapter to each session's relay task.
#[async_trait]
pub trait ProducerAdapter: Send + Sync + 'static {
    /// Adapter name for logging
    fn name(&self) -> &str;

    /// Whether the producer looks usable
    async fn health_check(&self) -> bool {
        true
    }

    /// Begin a response for `input`
    ///
    /// Errors returned here are startup failures. Once a stream is returned,
    /// failures travel inside it.
    async fn start_session(
        &self,
        input: &str,
        cancel: CancelToken,
    ) -> Result<RawEventStream, ProducerError>;
}
