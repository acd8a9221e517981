//! Child-process producer
//!
//! Runs the agent as a child process, writes the input to its stdin and reads
//! NDJSON frames (see [`parse_line`](super::parse_line)) from its stdout.
//! Stderr is forwarded to the debug log.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;

use super::wire::parse_line;
use super::{ProducerAdapter, ProducerError, RawEventStream};
use crate::cancel::CancelToken;
use crate::events::RawEvent;

/// How to launch the agent process
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory (inherits the current one if unset)
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl AgentCommand {
    /// Command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Set the arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Producer backed by an agent child process
#[derive(Clone, Debug)]
pub struct CommandProducer {
    command: AgentCommand,
}

impl CommandProducer {
    /// Create a producer for the given command
    #[must_use]
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }

    /// The command this producer launches
    #[must_use]
    pub fn command(&self) -> &AgentCommand {
        &self.command
    }
}

#[async_trait]
impl ProducerAdapter for CommandProducer {
    fn name(&self) -> &str {
        &self.command.program
    }

    async fn health_check(&self) -> bool {
        resolve_program(&self.command.program).is_some()
    }

    async fn start_session(
        &self,
        input: &str,
        cancel: CancelToken,
    ) -> Result<RawEventStream, ProducerError> {
        let mut child = self
            .command
            .to_command()
            .spawn()
            .map_err(|e| ProducerError::Startup(format!("{}: {e}", self.command.program)))?;

        tracing::debug!(
            program = %self.command.program,
            pid = ?child.id(),
            "Agent process started"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let payload = format!("{input}\n");
            tokio::spawn(async move {
                // Closing stdin marks the end of the input
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    tracing::debug!(error = %e, "Failed to write agent input");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "relay_core::agent", "{line}");
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProducerError::Startup("agent stdout not captured".to_string()))?;

        let reader = ReadState {
            child,
            lines: LinesStream::new(BufReader::new(stdout).lines()),
            cancel,
            finished: false,
        };

        Ok(stream::unfold(reader, ReadState::next_event).boxed())
    }
}

/// What woke the reader
enum Wake {
    Cancelled,
    Line(Option<std::io::Result<String>>),
}

struct ReadState {
    child: Child,
    lines: LinesStream<BufReader<ChildStdout>>,
    cancel: CancelToken,
    finished: bool,
}

impl ReadState {
    async fn next_event(mut self) -> Option<(Result<RawEvent, ProducerError>, Self)> {
        if self.finished {
            return None;
        }

        loop {
            let wake = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Wake::Cancelled,
                line = self.lines.next() => Wake::Line(line),
            };

            match wake {
                Wake::Cancelled => {
                    self.finished = true;
                    if let Err(e) = self.child.kill().await {
                        tracing::debug!(error = %e, "Failed to kill agent process");
                    }
                    return Some((Err(ProducerError::Cancelled), self));
                }
                Wake::Line(Some(Ok(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let event = parse_line(line);
                    return Some((event, self));
                }
                Wake::Line(Some(Err(e))) => {
                    self.finished = true;
                    return Some((Err(ProducerError::Io(e)), self));
                }
                Wake::Line(None) => {
                    self.finished = true;
                    return match self.child.wait().await {
                        Ok(status) if status.success() => None,
                        Ok(status) => Some((
                            Err(ProducerError::Exited {
                                code: status.code(),
                            }),
                            self,
                        )),
                        Err(e) => Some((Err(ProducerError::Io(e)), self)),
                    };
                }
            }
        }
    }
}

/// Find the program on disk: as given if it contains a path, otherwise on `PATH`
fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_command_builder() {
        let cmd = AgentCommand::new("python3")
            .with_args(["-m", "agent"])
            .with_working_dir("/tmp")
            .with_env("PYTHONUNBUFFERED", "1");

        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["-m", "agent"]);
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(cmd.env.len(), 1);
    }

    #[test]
    fn test_resolve_missing_program() {
        assert!(resolve_program("").is_none());
        assert!(resolve_program("definitely-not-a-real-agent-binary").is_none());
        assert!(resolve_program("/nonexistent/dir/agent").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_health_check_finds_shell() {
        let producer = CommandProducer::new(AgentCommand::new("sh"));
        assert!(producer.health_check().await);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_startup_error() {
        let producer = CommandProducer::new(AgentCommand::new("definitely-not-a-real-agent-binary"));
        let result = producer.start_session("hi", CancelToken::new()).await;
        assert!(matches!(result, Err(ProducerError::Startup(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_frames_from_stdout() {
        let script = r#"read line; echo "{\"type\":\"chunk\",\"content\":\"$line\"}"; echo; echo '{"type":"complete"}'"#;
        let producer = CommandProducer::new(AgentCommand::new("sh").with_args(["-c", script]));

        let stream = producer
            .start_session("ping", CancelToken::new())
            .await
            .unwrap();
        let events: Vec<_> = stream.map(Result::unwrap).collect().await;

        assert_eq!(
            events,
            vec![RawEvent::chunk("ping"), RawEvent::Complete]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let producer =
            CommandProducer::new(AgentCommand::new("sh").with_args(["-c", "exit 3"]));

        let mut stream = producer
            .start_session("", CancelToken::new())
            .await
            .unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProducerError::Exited { code: Some(3) }));
        assert!(stream.next().await.is_none());
    }
}
