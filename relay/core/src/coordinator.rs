//! Streaming Session Coordinator
//!
//! Owns one streaming session at a time and bridges the producer's background
//! stream into the single-threaded UI context.
//!
//! # Flow
//!
//! 1. [`Coordinator::start_streaming`] creates a [`Session`], a fresh
//!    [`CancelToken`] and [`ChunkQueue`], notifies the sink and spawns the
//!    relay task.
//! 2. The relay task drives the producer stream and pushes [`StreamEvent`]s
//!    into the queue. It never touches the sink.
//! 3. `start_streaming` keeps awaiting on the caller's context. Each time the
//!    queue signals, it drains every buffered event and dispatches them in
//!    order.
//! 4. Once a terminal event has been dispatched the call resolves with a
//!    [`SessionSummary`].
//!
//! A terminal-event latch on the session guarantees exactly one terminal
//! callback per session no matter how many completion signals the producer
//! sends or how they race with cancellation and forced interruption.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::events::{RawEvent, SessionId, StreamEvent};
use crate::lifecycle::{HostLifecycle, Teardown};
use crate::producer::{ProducerAdapter, ProducerError, RawEventStream};
use crate::queue::ChunkQueue;
use crate::session::{Session, SessionState, StreamStats};
use crate::sink::EventSink;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the coordinator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound on a whole session; `None` disables it
    pub total_timeout: Option<Duration>,
    /// Upper bound on the gap between producer events; `None` disables it
    pub idle_timeout: Option<Duration>,
}

impl CoordinatorConfig {
    /// Default total timeout used by [`CoordinatorConfig::watchdog`]
    pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(300);
    /// Default idle timeout used by [`CoordinatorConfig::watchdog`]
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Config with the stream watchdog enabled (5 minutes total, 60 seconds idle)
    #[must_use]
    pub fn watchdog() -> Self {
        Self {
            total_timeout: Some(Self::DEFAULT_TOTAL_TIMEOUT),
            idle_timeout: Some(Self::DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Set the total timeout
    #[must_use]
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What a finished session looked like
#[derive(Clone, Debug)]
pub struct SessionSummary {
    /// Session ID
    pub id: SessionId,
    /// Terminal state
    pub state: SessionState,
    /// Throughput statistics
    pub stats: StreamStats,
}

/// Result of [`Coordinator::start_streaming`]
#[derive(Clone, Debug)]
pub enum SessionOutcome {
    /// Another session was active; nothing was started
    Rejected,
    /// The session ran to a terminal state
    Finished(SessionSummary),
}

impl SessionOutcome {
    /// Summary of the finished session, if one ran
    #[must_use]
    pub fn summary(&self) -> Option<&SessionSummary> {
        match self {
            Self::Rejected => None,
            Self::Finished(summary) => Some(summary),
        }
    }

    /// Terminal state of the finished session, if one ran
    #[must_use]
    pub fn state(&self) -> Option<SessionState> {
        self.summary().map(|s| s.state)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Session bookkeeping guarded by one lock
#[derive(Default)]
struct Inner {
    session: Option<Session>,
    cancel: Option<CancelToken>,
    queue: Option<Arc<ChunkQueue>>,
    last_stats: Option<StreamStats>,
}

impl Inner {
    fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, Session::state)
    }
}

/// Streaming session coordinator
///
/// Lock order is sink, then inner state. The sink lock also serializes
/// dispatch, so events drained by different callers never interleave.
pub struct Coordinator<P: ProducerAdapter, S: EventSink> {
    /// Producer shared with relay tasks
    producer: Arc<P>,
    /// UI sink; held for the duration of each drain
    sink: Mutex<S>,
    /// Session state
    inner: Mutex<Inner>,
    /// Host teardown notifications, if wired up
    lifecycle: Option<HostLifecycle>,
    /// Configuration
    config: CoordinatorConfig,
}

impl<P: ProducerAdapter, S: EventSink> Coordinator<P, S> {
    /// Create a coordinator
    pub fn new(producer: P, sink: S, config: CoordinatorConfig) -> Self {
        Self {
            producer: Arc::new(producer),
            sink: Mutex::new(sink),
            inner: Mutex::new(Inner::default()),
            lifecycle: None,
            config,
        }
    }

    /// Interrupt active sessions when `lifecycle` signals a teardown
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: HostLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// The producer adapter
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// The configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current session state (`Idle` when no session exists)
    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    /// ID of the current (or last unreset) session
    pub fn current_session(&self) -> Option<SessionId> {
        self.inner.lock().session.as_ref().map(Session::id)
    }

    /// Whether a session is starting or streaming
    pub fn is_streaming(&self) -> bool {
        self.state().is_active()
    }

    /// Events buffered but not yet dispatched
    pub fn queued_events(&self) -> usize {
        self.inner.lock().queue.as_ref().map_or(0, |q| q.len())
    }

    /// Statistics of the most recently finished session
    pub fn last_stats(&self) -> Option<StreamStats> {
        self.inner.lock().last_stats.clone()
    }

    /// Run one streaming session for `input`
    ///
    /// Resolves once the terminal event has been dispatched to the sink.
    /// Returns [`SessionOutcome::Rejected`] without touching the producer if
    /// the coordinator is not `Idle`.
    ///
    /// Dropping the future before it resolves cancels the producer, flushes
    /// whatever was queued and ends the session as `Cancelled` unless it had
    /// already reached a terminal state.
    pub async fn start_streaming(&self, input: &str) -> SessionOutcome {
        let Some((id, cancel, queue)) = self.begin_session() else {
            return SessionOutcome::Rejected;
        };
        let mut guard = SessionGuard {
            coordinator: self,
            queue: Arc::clone(&queue),
            cancel: cancel.clone(),
            armed: true,
        };

        tracing::info!(
            session = %id,
            producer = self.producer.name(),
            "Streaming session started"
        );

        let mut teardowns = self.lifecycle.as_ref().map(HostLifecycle::subscribe);

        {
            let mut sink = self.sink.lock();
            dispatch_guarded(&mut *sink, "session_started", |s| s.on_session_started(id));
        }

        let mut relay = tokio::spawn(relay(
            id,
            Arc::clone(&self.producer),
            input.to_string(),
            cancel.clone(),
            Arc::clone(&queue),
            self.config.clone(),
        ));
        let mut relay_finished = false;

        while !self.session_finished() {
            tokio::select! {
                () = queue.ready() => {
                    self.drain_and_dispatch(&queue);
                }
                teardown = next_teardown(&mut teardowns) => {
                    tracing::info!(session = %id, reason = %teardown.reason, "Host teardown during session");
                    self.force_interrupt(teardown.notice_text());
                }
                result = &mut relay, if !relay_finished => {
                    relay_finished = true;
                    if let Err(e) = result {
                        tracing::error!(session = %id, error = %e, "Relay task failed");
                        queue.push(StreamEvent::error("Agent relay stopped unexpectedly"));
                    }
                    self.drain_and_dispatch(&queue);
                }
            }
        }

        guard.armed = false;

        // Let an in-flight dispatch from another caller finish, then drop leftovers
        self.drain_and_dispatch(&queue);
        cancel.cancel();
        queue.clear();

        let summary = self.finish_session();
        tracing::info!(
            session = %id,
            state = %summary.state,
            stats = %summary.stats,
            "Streaming session finished"
        );
        SessionOutcome::Finished(summary)
    }

    /// Request cancellation of the active session
    ///
    /// No-op when no session is active. The terminal `Cancelled` event is
    /// delivered through the normal drain once the relay observes the token.
    pub fn stop_streaming(&self) {
        let inner = self.inner.lock();
        match (&inner.cancel, inner.state().is_active()) {
            (Some(cancel), true) => {
                if !cancel.is_cancelled() {
                    tracing::info!("Cancellation requested");
                }
                cancel.cancel();
            }
            _ => tracing::debug!("Stop requested with no active session"),
        }
    }

    /// Force the active session down because the host is tearing down
    ///
    /// Dispatches already-queued chunks immediately, then the `Interrupted`
    /// notice, then cancels the producer. Returns `false` if no session was
    /// starting or streaming.
    ///
    /// Must not be called from inside an [`EventSink`] callback.
    pub fn force_interrupt(&self, notice: &str) -> bool {
        let mut sink = self.sink.lock();

        let (queue, cancel) = {
            let inner = self.inner.lock();
            if !inner.state().is_active() {
                tracing::debug!(state = %inner.state(), "Interrupt requested with no active session");
                return false;
            }
            match (&inner.queue, &inner.cancel) {
                (Some(queue), Some(cancel)) => (Arc::clone(queue), cancel.clone()),
                _ => return false,
            }
        };

        tracing::warn!("Forcing session interruption");

        self.dispatch_all(&mut *sink, queue.drain());
        queue.push(StreamEvent::Interrupted {
            notice: notice.to_string(),
        });
        cancel.cancel();
        self.dispatch_all(&mut *sink, queue.drain());
        true
    }

    /// Return to `Idle` after a terminal state so a new session can start
    ///
    /// Returns `false` while a session is still active.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.state();
        if state.is_active() {
            tracing::warn!(state = %state, "Cannot reset while a session is active");
            return false;
        }
        inner.session = None;
        true
    }

    fn begin_session(&self) -> Option<(SessionId, CancelToken, Arc<ChunkQueue>)> {
        let mut inner = self.inner.lock();
        let state = inner.state();
        if state != SessionState::Idle {
            tracing::warn!(state = %state, "Session already in progress, ignoring start request");
            return None;
        }

        let mut session = Session::new();
        session.transition(SessionState::Starting);
        let id = session.id();
        let cancel = CancelToken::new();
        let queue = Arc::new(ChunkQueue::new());

        inner.session = Some(session);
        inner.cancel = Some(cancel.clone());
        inner.queue = Some(Arc::clone(&queue));
        Some((id, cancel, queue))
    }

    fn session_finished(&self) -> bool {
        match self.inner.lock().session.as_ref() {
            Some(session) => session.is_completed(),
            None => true,
        }
    }

    fn finish_session(&self) -> SessionSummary {
        let mut inner = self.inner.lock();
        inner.cancel = None;
        inner.queue = None;

        let (id, state, stats) = match inner.session.as_ref() {
            Some(session) => (session.id(), session.state(), session.stats().clone()),
            None => (SessionId::new(), SessionState::Idle, StreamStats::default()),
        };
        inner.last_stats = Some(stats.clone());
        SessionSummary { id, state, stats }
    }

    /// Close a session whose `start_streaming` future was dropped
    fn abandon_session(&self, queue: &ChunkQueue, cancel: &CancelToken) {
        cancel.cancel();
        {
            let mut sink = self.sink.lock();
            self.dispatch_all(&mut *sink, queue.drain());
            if !self.session_finished() {
                self.dispatch(&mut *sink, StreamEvent::Cancelled);
            }
        }
        queue.clear();

        let summary = self.finish_session();
        tracing::warn!(
            session = %summary.id,
            state = %summary.state,
            stats = %summary.stats,
            "Streaming session abandoned by its caller"
        );
    }

    fn drain_and_dispatch(&self, queue: &ChunkQueue) {
        let mut sink = self.sink.lock();
        let events = queue.drain();
        self.dispatch_all(&mut *sink, events);
    }

    fn dispatch_all(&self, sink: &mut S, events: Vec<StreamEvent>) {
        for event in events {
            self.dispatch(sink, event);
        }
    }

    /// Deliver one event, honouring the terminal latch
    fn dispatch(&self, sink: &mut S, event: StreamEvent) {
        let (accepted, id) = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.session.as_mut() else {
                tracing::debug!(kind = event.kind(), "Dropping event with no session");
                return;
            };
            let accepted = match (&event, event.terminal_state()) {
                (StreamEvent::Chunk { text }, _) => session.accept_chunk(text),
                (_, Some(state)) => session.accept_terminal(state),
                (_, None) => false,
            };
            (accepted, session.id())
        };

        if !accepted {
            tracing::debug!(session = %id, kind = event.kind(), "Dropping event after terminal");
            return;
        }

        tracing::debug!(session = %id, kind = event.kind(), "Dispatching event");
        match &event {
            StreamEvent::Chunk { text } => dispatch_guarded(sink, "chunk", |s| s.on_chunk(text)),
            StreamEvent::Complete => {
                dispatch_guarded(sink, "session_completed", S::on_session_completed);
            }
            StreamEvent::Error { message } => {
                dispatch_guarded(sink, "session_failed", |s| s.on_session_failed(message));
            }
            StreamEvent::Interrupted { notice } => {
                dispatch_guarded(sink, "session_interrupted", |s| {
                    s.on_session_interrupted(notice);
                });
            }
            StreamEvent::Cancelled => {
                dispatch_guarded(sink, "session_cancelled", S::on_session_cancelled);
            }
        }
    }
}

/// Closes the session if `start_streaming` is dropped before it resolves
struct SessionGuard<'a, P: ProducerAdapter, S: EventSink> {
    coordinator: &'a Coordinator<P, S>,
    queue: Arc<ChunkQueue>,
    cancel: CancelToken,
    armed: bool,
}

impl<P: ProducerAdapter, S: EventSink> Drop for SessionGuard<'_, P, S> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.abandon_session(&self.queue, &self.cancel);
        }
    }
}

/// Run a sink callback, containing any panic so the drain continues
fn dispatch_guarded<S: EventSink>(sink: &mut S, callback: &'static str, f: impl FnOnce(&mut S)) {
    if catch_unwind(AssertUnwindSafe(|| f(sink))).is_err() {
        tracing::warn!(callback, "Event sink panicked; continuing");
    }
}

/// Wait for the next teardown; never resolves without a subscription
async fn next_teardown(rx: &mut Option<broadcast::Receiver<Teardown>>) -> Teardown {
    loop {
        let Some(receiver) = rx.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(teardown) => return teardown,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Teardown notifications lagged");
            }
            Err(RecvError::Closed) => *rx = None,
        }
    }
}

// ============================================================================
// Relay Task
// ============================================================================

/// Drive the producer stream and push everything into the queue
///
/// Runs on the background context. Always pushes at least one terminal event
/// before returning; duplicates are dropped by the dispatch latch.
async fn relay<P: ProducerAdapter>(
    id: SessionId,
    producer: Arc<P>,
    input: String,
    cancel: CancelToken,
    queue: Arc<ChunkQueue>,
    config: CoordinatorConfig,
) {
    let watchdog = Watchdog::new(&config);
    let terminal = match run_relay(id, &*producer, &input, &cancel, &queue, &watchdog).await {
        Ok(terminal) => terminal,
        Err(timeout) => {
            tracing::warn!(session = %id, "Producer timed out");
            cancel.cancel();
            timeout
        }
    };
    queue.push(terminal);
}

/// What woke the relay
enum Wake {
    Cancelled,
    Item(Option<Result<RawEvent, ProducerError>>),
}

async fn run_relay<P: ProducerAdapter>(
    id: SessionId,
    producer: &P,
    input: &str,
    cancel: &CancelToken,
    queue: &ChunkQueue,
    watchdog: &Watchdog,
) -> Result<StreamEvent, StreamEvent> {
    if cancel.is_cancelled() {
        return Ok(StreamEvent::Cancelled);
    }

    let started = watchdog
        .guard(async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = producer.start_session(input, cancel.clone()) => Some(result),
            }
        })
        .await?;

    let mut stream: RawEventStream = match started {
        None => return Ok(StreamEvent::Cancelled),
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            tracing::error!(session = %id, producer = producer.name(), error = %e, "Producer failed to start");
            return Ok(StreamEvent::error(e.to_string()));
        }
    };

    loop {
        let wake = watchdog
            .guard(async {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Wake::Cancelled,
                    item = stream.next() => Wake::Item(item),
                }
            })
            .await?;

        match wake {
            Wake::Cancelled | Wake::Item(Some(Err(ProducerError::Cancelled))) => {
                return Ok(StreamEvent::Cancelled);
            }
            Wake::Item(None) => {
                // End of stream is an implicit completion
                return Ok(if cancel.is_cancelled() {
                    StreamEvent::Cancelled
                } else {
                    StreamEvent::Complete
                });
            }
            Wake::Item(Some(Ok(RawEvent::Chunk { content }))) => {
                if cancel.is_cancelled() {
                    tracing::debug!(session = %id, "Dropping chunk received after cancellation");
                    continue;
                }
                queue.push(StreamEvent::Chunk { text: content });
            }
            Wake::Item(Some(Ok(raw))) => {
                if let RawEvent::Error { error } = &raw {
                    tracing::error!(session = %id, error = %error, "Producer reported an error");
                }
                queue.push(raw.into());
            }
            Wake::Item(Some(Err(e))) if !e.is_fatal() => {
                tracing::warn!(session = %id, error = %e, "Skipping malformed event");
            }
            Wake::Item(Some(Err(e))) => {
                tracing::error!(session = %id, error = %e, "Producer stream failed");
                return Ok(StreamEvent::error(e.to_string()));
            }
        }
    }
}

/// Optional total and idle deadlines for the relay
struct Watchdog {
    total_deadline: Option<Instant>,
    idle: Option<Duration>,
}

impl Watchdog {
    fn new(config: &CoordinatorConfig) -> Self {
        Self {
            total_deadline: config.total_timeout.map(|t| Instant::now() + t),
            idle: config.idle_timeout,
        }
    }

    /// Earliest deadline from now, with the event to emit if it passes
    fn next_deadline(&self) -> Option<(Instant, StreamEvent)> {
        let idle = self.idle.map(|idle| {
            (
                Instant::now() + idle,
                StreamEvent::error(format!(
                    "Response timed out: no new data for {} seconds",
                    idle.as_secs()
                )),
            )
        });
        let total = self.total_deadline.map(|deadline| {
            (
                deadline,
                StreamEvent::error("Response timed out: processing took too long"),
            )
        });

        match (total, idle) {
            (Some(total), Some(idle)) => Some(if idle.0 < total.0 { idle } else { total }),
            (total, idle) => total.or(idle),
        }
    }

    /// Await `fut`, failing with the timeout event if a deadline passes first
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, StreamEvent> {
        match self.next_deadline() {
            None => Ok(fut.await),
            Some((deadline, timeout)) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{ScriptStep, ScriptedProducer};
    use crate::sink::{ChannelSink, SinkEvent};

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_config_defaults() {
        let config = CoordinatorConfig::default();
        assert!(config.total_timeout.is_none());
        assert!(config.idle_timeout.is_none());

        let watchdog = CoordinatorConfig::watchdog();
        assert_eq!(watchdog.total_timeout, Some(Duration::from_secs(300)));
        assert_eq!(watchdog.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_idle_coordinator() {
        let (sink, mut rx) = ChannelSink::new();
        let coordinator =
            Coordinator::new(ScriptedProducer::default(), sink, CoordinatorConfig::default());

        assert_eq!(coordinator.state(), SessionState::Idle);
        assert!(!coordinator.is_streaming());
        assert!(coordinator.current_session().is_none());
        assert!(!coordinator.force_interrupt("nothing"));
        coordinator.stop_streaming();
        assert!(coordinator.reset());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_empty_stream_completes() {
        let (sink, mut rx) = ChannelSink::new();
        let coordinator =
            Coordinator::new(ScriptedProducer::new(vec![]), sink, CoordinatorConfig::default());

        let outcome = coordinator.start_streaming("hi").await;
        assert_eq!(outcome.state(), Some(SessionState::Completed));

        let events = drain(&mut rx);
        assert!(matches!(events[0], SinkEvent::Started(_)));
        assert_eq!(events[1..], [SinkEvent::Completed]);
    }

    #[tokio::test]
    async fn test_reset_allows_next_session() {
        let (sink, _rx) = ChannelSink::new();
        let coordinator = Coordinator::new(
            ScriptedProducer::chunks(["x"]),
            sink,
            CoordinatorConfig::default(),
        );

        coordinator.start_streaming("one").await;
        assert_eq!(coordinator.state(), SessionState::Completed);
        assert!(matches!(
            coordinator.start_streaming("two").await,
            SessionOutcome::Rejected
        ));

        assert!(coordinator.reset());
        assert_eq!(coordinator.state(), SessionState::Idle);
        let outcome = coordinator.start_streaming("three").await;
        assert_eq!(outcome.state(), Some(SessionState::Completed));
        assert_eq!(coordinator.producer().inputs(), vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let (sink, mut rx) = ChannelSink::new();
        let producer = ScriptedProducer::new(vec![
            ScriptStep::Chunk("A".into()),
            ScriptStep::Malformed("{oops".into()),
            ScriptStep::Chunk("B".into()),
        ]);
        let coordinator = Coordinator::new(producer, sink, CoordinatorConfig::default());

        let outcome = coordinator.start_streaming("x").await;
        assert_eq!(outcome.state(), Some(SessionState::Completed));

        let events = drain(&mut rx);
        assert_eq!(
            events[1..],
            [
                SinkEvent::Chunk("A".into()),
                SinkEvent::Chunk("B".into()),
                SinkEvent::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_recorded() {
        let (sink, _rx) = ChannelSink::new();
        let coordinator = Coordinator::new(
            ScriptedProducer::chunks(["ab", "cde"]),
            sink,
            CoordinatorConfig::default(),
        );

        let outcome = coordinator.start_streaming("x").await;
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.stats.chunks, 2);
        assert_eq!(summary.stats.characters, 5);
        assert_eq!(coordinator.last_stats().unwrap().chunks, 2);
        assert_eq!(coordinator.queued_events(), 0);
    }
}
