//! Scripted producer
//!
//! Replays a fixed list of steps for every session. Used by the test suite and
//! handy for demos that should not depend on a real agent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::{ProducerAdapter, ProducerError, RawEventStream};
use crate::cancel::CancelToken;
use crate::events::RawEvent;

/// One step of a scripted response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Yield a chunk
    Chunk(String),
    /// Yield a completion frame
    Complete,
    /// Yield an error frame
    Error(String),
    /// Fail the stream with [`ProducerError::Stream`]
    Fail(String),
    /// Yield a frame the relay cannot understand
    Malformed(String),
    /// Wait, returning early if cancelled
    Pause(Duration),
    /// Wait until cancelled
    AwaitCancel,
}

/// Producer that replays a script
#[derive(Clone, Debug, Default)]
pub struct ScriptedProducer {
    steps: Vec<ScriptStep>,
    startup_error: Option<String>,
    invocations: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProducer {
    /// Replay `steps` for every session
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Yield each chunk and then complete
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<_> = chunks
            .into_iter()
            .map(|c| ScriptStep::Chunk(c.into()))
            .collect();
        steps.push(ScriptStep::Complete);
        Self::new(steps)
    }

    /// Fail every session before producing anything
    pub fn failing_startup(message: impl Into<String>) -> Self {
        Self {
            startup_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Number of sessions started against this producer
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Inputs received so far, oldest first
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl ProducerAdapter for ScriptedProducer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_session(
        &self,
        input: &str,
        cancel: CancelToken,
    ) -> Result<RawEventStream, ProducerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.to_string());

        if let Some(message) = &self.startup_error {
            return Err(ProducerError::Startup(message.clone()));
        }

        let steps: VecDeque<ScriptStep> = self.steps.iter().cloned().collect();
        Ok(stream::unfold((steps, cancel), next_step).boxed())
    }
}

async fn next_step(
    (mut steps, cancel): (VecDeque<ScriptStep>, CancelToken),
) -> Option<(Result<RawEvent, ProducerError>, (VecDeque<ScriptStep>, CancelToken))> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let item = match steps.pop_front()? {
            ScriptStep::Chunk(text) => Ok(RawEvent::chunk(text)),
            ScriptStep::Complete => Ok(RawEvent::Complete),
            ScriptStep::Error(message) => Ok(RawEvent::error(message)),
            ScriptStep::Fail(message) => Err(ProducerError::Stream(message)),
            ScriptStep::Malformed(line) => Err(ProducerError::MalformedEvent(line)),
            ScriptStep::Pause(duration) => {
                // Elapsed and cancelled both just move on
                let _ = tokio::time::timeout(duration, cancel.cancelled()).await;
                continue;
            }
            ScriptStep::AwaitCancel => {
                cancel.cancelled().await;
                continue;
            }
        };

        return Some((item, (steps, cancel)));
    }
}
