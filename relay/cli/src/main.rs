//! relay - stream an embedded agent's response to the terminal
//!
//! Launches the configured agent process per prompt and prints its response
//! as it streams in.
//!
//! # Usage
//!
//! ```bash
//! # One prompt
//! relay --agent python3 --arg streaming_agent.py "Explain lifetimes"
//!
//! # Prompts from stdin, one per line
//! relay < prompts.txt
//!
//! # Verbose logging
//! RUST_LOG=relay_core=debug relay "hello"
//! ```
//!
//! # Signals
//!
//! - Ctrl+C: cancel the streaming response (exit when idle)
//! - SIGTERM: interrupt the response, keep what arrived, then exit
//!
//! Configuration is read from `$XDG_CONFIG_HOME/agent-relay/relay.toml`; see
//! `relay_core::config` for the format and environment variables.

mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::{
    default_config_path, load_config_from_path, CommandProducer, ConfigOverrides, Coordinator,
    HostLifecycle, ProducerAdapter, SessionOutcome, SessionState, TeardownReason,
};

use crate::terminal::TerminalSink;

type TerminalCoordinator = Coordinator<CommandProducer, TerminalSink<std::io::Stdout>>;

/// Stream an embedded agent's response to the terminal
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Args {
    /// Config file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Agent executable
    #[arg(short = 'a', long = "agent", value_name = "CMD")]
    agent: Option<String>,

    /// Agent argument (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    agent_args: Vec<String>,

    /// Total response timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Timeout between agent outputs in seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout_secs: Option<u64>,

    /// Prompt to send; prompts are read from stdin when omitted
    prompt: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(agent) = &self.agent {
            overrides = overrides.with_agent_program(agent.clone());
        }
        if !self.agent_args.is_empty() {
            overrides = overrides.with_agent_args(self.agent_args.clone());
        }
        if let Some(secs) = self.timeout_secs {
            overrides = overrides.with_timeout_secs(secs);
        }
        if let Some(secs) = self.idle_timeout_secs {
            overrides = overrides.with_idle_timeout_secs(secs);
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) if !path.exists() => {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Some(path) => Some(path.clone()),
        None => default_config_path(),
    };
    let mut config = load_config_from_path(config_path.clone())?;
    args.overrides().apply(&mut config)?;

    // Logs go to stderr; stdout carries the response
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    info!(
        source = %config.source(),
        path = ?config.config_file_path,
        "Configuration loaded"
    );

    let Some(command) = config.agent_command() else {
        let location = config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the config file".to_string());
        anyhow::bail!(
            "No agent configured. Pass --agent, set RELAY_AGENT_COMMAND, or set [agent] command in {location}"
        );
    };

    let producer = CommandProducer::new(command);
    if !producer.health_check().await {
        warn!(program = producer.name(), "Agent program not found; sessions will fail to start");
    }

    let lifecycle = HostLifecycle::new();
    let coordinator: Arc<TerminalCoordinator> = Arc::new(
        Coordinator::new(
            producer,
            TerminalSink::new(std::io::stdout()),
            config.coordinator.clone(),
        )
        .with_lifecycle(lifecycle.clone()),
    );

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(handle_signals(
        Arc::clone(&coordinator),
        lifecycle,
        Arc::clone(&shutdown),
    ));

    let failed = match &args.prompt {
        Some(prompt) => run_prompt(&coordinator, prompt).await == Some(SessionState::Failed),
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line?,
                    () = shutdown.notified() => break,
                };
                let Some(line) = line else { break };
                let prompt = line.trim();
                if prompt.is_empty() {
                    continue;
                }
                if run_prompt(&coordinator, prompt).await == Some(SessionState::Interrupted) {
                    // Interruption only comes from host shutdown
                    break;
                }
            }
            false
        }
    };

    info!("Exiting");
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Run one prompt to completion, returning the terminal state
async fn run_prompt(coordinator: &TerminalCoordinator, prompt: &str) -> Option<SessionState> {
    coordinator.reset();
    match coordinator.start_streaming(prompt).await {
        SessionOutcome::Rejected => {
            warn!("A response is already streaming");
            None
        }
        SessionOutcome::Finished(summary) => {
            info!(
                session = %summary.id,
                state = %summary.state,
                stats = %summary.stats,
                "Response finished"
            );
            Some(summary.state)
        }
    }
}

/// Map Ctrl+C to cancellation and SIGTERM to a host teardown
async fn handle_signals(
    coordinator: Arc<TerminalCoordinator>,
    lifecycle: HostLifecycle,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Ctrl+C handler failed");
                    return;
                }
                if coordinator.is_streaming() {
                    info!("Received Ctrl+C, cancelling response");
                    coordinator.stop_streaming();
                } else {
                    info!("Received Ctrl+C, shutting down");
                    shutdown.notify_one();
                }
            }
            () = terminate() => {
                info!("Received SIGTERM, shutting down");
                lifecycle.signal(TeardownReason::Shutdown);
                shutdown.notify_one();
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
