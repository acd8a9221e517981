//! Relay Core - Streaming Session Coordination for agent-relay
//!
//! This crate bridges an asynchronous, chunked, cancellable response stream
//! produced by a locally embedded agent into a single-threaded UI. It knows
//! nothing about rendering: a UI surface implements [`EventSink`], an agent
//! backend implements [`ProducerAdapter`], and the [`Coordinator`] guarantees
//! ordered delivery and exactly one terminal event per session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── UI context ─────────────────────────────┐
//! │                                                                     │
//! │   EventSink  ◄── dispatch ──  Coordinator::start_streaming(input)   │
//! │  (on_chunk,                        │        ▲                       │
//! │   on_session_*)                    │        │ drain all (FIFO)      │
//! │                                    │   ┌────┴─────┐                 │
//! │   HostLifecycle ── teardown ──────►│   │ChunkQueue│                 │
//! │                                    │   └────▲─────┘                 │
//! └────────────────────────────────────┼────────┼───────────────────────┘
//!                                      │ spawn  │ push
//! ┌──────────────────────── background ┼────────┼───────────────────────┐
//! │                                    ▼        │                       │
//! │        relay task ── ProducerAdapter::start_session(input, cancel)  │
//! │                          (RawEvent stream, observes CancelToken)    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Coordinator`]: owns one streaming session at a time
//! - [`StreamEvent`]: what flows through the [`ChunkQueue`]
//! - [`RawEvent`]: what a producer yields
//! - [`CancelToken`]: cooperative cancellation latch
//! - [`HostLifecycle`]: forced-teardown notifications from the host
//! - [`Session`] / [`SessionState`]: lifecycle bookkeeping
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_core::{ChannelSink, Coordinator, CoordinatorConfig, ScriptedProducer};
//!
//! let producer = ScriptedProducer::chunks(["Hi", " there"]);
//! let (sink, mut updates) = ChannelSink::new();
//! let coordinator = Coordinator::new(producer, sink, CoordinatorConfig::default());
//!
//! let outcome = coordinator.start_streaming("hello").await;
//! while let Ok(update) = updates.try_recv() {
//!     println!("{update:?}");
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`cancel`]: cancellation token
//! - [`config`]: TOML / environment configuration
//! - [`coordinator`]: the streaming session coordinator
//! - [`events`]: stream events, raw producer events, identifiers
//! - [`lifecycle`]: host lifecycle monitor
//! - [`producer`]: producer adapter trait and implementations
//! - [`queue`]: the chunk queue
//! - [`session`]: session state machine and statistics
//! - [`sink`]: UI event sink trait and a channel-backed sink

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod lifecycle;
pub mod producer;
pub mod queue;
pub mod session;
pub mod sink;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig, RelayToml,
};
pub use coordinator::{Coordinator, CoordinatorConfig, SessionOutcome, SessionSummary};
pub use events::{FailureKind, RawEvent, SessionId, StreamEvent};
pub use lifecycle::{HostLifecycle, Teardown, TeardownReason};
pub use producer::{
    AgentCommand, CommandProducer, ProducerAdapter, ProducerError, RawEventStream,
    ScriptStep, ScriptedProducer,
};
pub use queue::ChunkQueue;
pub use session::{Session, SessionState, StreamStats};
pub use sink::{ChannelSink, EventSink, SinkEvent};
