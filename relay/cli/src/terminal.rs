//! Terminal rendering of session events
//!
//! Streams chunks straight to the writer as they arrive. Failures get an
//! `[error]` line plus hints for recognisable causes; interruptions print the
//! host's notice without error styling so partial output reads naturally.

use std::io::{self, Write};

use relay_core::{EventSink, FailureKind, SessionId};

/// [`EventSink`] that writes the response to a terminal
pub struct TerminalSink<W: Write + Send> {
    out: W,
    /// Whether the cursor sits at the start of a line
    at_line_start: bool,
}

impl<W: Write + Send> TerminalSink<W> {
    /// Render to `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    /// Consume the sink, returning the writer
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, f: impl FnOnce(&mut W) -> io::Result<()>) {
        if let Err(e) = f(&mut self.out).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "Failed to write to terminal");
        }
    }

    fn write_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.emit(|out| out.write_all(text.as_bytes()));
        self.at_line_start = text.ends_with('\n');
    }

    fn finish_line(&mut self) {
        if !self.at_line_start {
            self.write_text("\n");
        }
    }
}

impl<W: Write + Send> EventSink for TerminalSink<W> {
    fn on_session_started(&mut self, id: SessionId) {
        tracing::debug!(session = %id, "Rendering response");
        self.at_line_start = true;
    }

    fn on_chunk(&mut self, text: &str) {
        self.write_text(text);
    }

    fn on_session_completed(&mut self) {
        self.finish_line();
    }

    fn on_session_failed(&mut self, message: &str) {
        self.finish_line();
        let mut rendered = format!("[error] {message}\n");
        for hint in FailureKind::classify(message).hints() {
            rendered.push_str(&format!("  - {hint}\n"));
        }
        self.write_text(&rendered);
    }

    fn on_session_cancelled(&mut self) {
        self.finish_line();
        self.write_text("[cancelled]\n");
    }

    fn on_session_interrupted(&mut self, notice: &str) {
        self.write_text(notice);
        self.finish_line();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn render(f: impl FnOnce(&mut TerminalSink<Vec<u8>>)) -> String {
        let mut sink = TerminalSink::new(Vec::new());
        sink.on_session_started(SessionId::new());
        f(&mut sink);
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_chunks_then_complete() {
        let out = render(|sink| {
            sink.on_chunk("Hi");
            sink.on_chunk(" there");
            sink.on_session_completed();
        });
        assert_eq!(out, "Hi there\n");
    }

    #[test]
    fn test_complete_after_newline_adds_nothing() {
        let out = render(|sink| {
            sink.on_chunk("done\n");
            sink.on_session_completed();
        });
        assert_eq!(out, "done\n");
    }

    #[test]
    fn test_failure_with_hints() {
        let out = render(|sink| {
            sink.on_chunk("partial");
            sink.on_session_failed("Response timed out: processing took too long");
        });
        assert_eq!(
            out,
            "partial\n\
             [error] Response timed out: processing took too long\n  \
             - Try simplifying the request\n  \
             - Check the network connection\n  \
             - Try again later\n"
        );
    }

    #[test]
    fn test_failure_without_hints() {
        let out = render(|sink| sink.on_session_failed("agent crashed"));
        assert_eq!(out, "[error] agent crashed\n");
    }

    #[test]
    fn test_interruption_keeps_partial_output() {
        let out = render(|sink| {
            sink.on_chunk("Hello, ");
            sink.on_session_interrupted("\n\n[Response interrupted: shutting down]");
        });
        assert_eq!(out, "Hello, \n\n[Response interrupted: shutting down]\n");
    }

    #[test]
    fn test_cancelled() {
        let out = render(|sink| {
            sink.on_chunk("Hel");
            sink.on_session_cancelled();
        });
        assert_eq!(out, "Hel\n[cancelled]\n");
    }
}
