//! NDJSON wire frames
//!
//! Agents write one JSON object per line:
//!
//! ```text
//! {"type": "chunk", "content": "Hel"}
//! {"type": "chunk", "content": "lo"}
//! {"type": "complete", "done": true}
//! {"type": "error", "error": "model unavailable", "done": true}
//! ```

use serde::Deserialize;

use super::ProducerError;
use crate::events::RawEvent;

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
    // Informational; the frame type already says whether the stream is done
    #[serde(default)]
    #[allow(dead_code)]
    done: Option<bool>,
}

/// Parse one NDJSON line into a [`RawEvent`]
///
/// # Errors
///
/// Returns [`ProducerError::MalformedEvent`] for invalid JSON, an unknown
/// frame type, or a frame missing its payload field.
pub fn parse_line(line: &str) -> Result<RawEvent, ProducerError> {
    let frame: WireFrame = serde_json::from_str(line)
        .map_err(|e| ProducerError::MalformedEvent(format!("{e}: {}", truncate(line))))?;

    match frame.kind.as_str() {
        "chunk" => frame
            .content
            .map(RawEvent::chunk)
            .ok_or_else(|| ProducerError::MalformedEvent("chunk without content".into())),
        "complete" => Ok(RawEvent::Complete),
        "error" => Ok(RawEvent::error(
            frame.error.unwrap_or_else(|| "Unknown agent error".to_string()),
        )),
        other => Err(ProducerError::MalformedEvent(format!(
            "unknown frame type '{other}'"
        ))),
    }
}

fn truncate(line: &str) -> String {
    const MAX: usize = 80;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let head: String = line.chars().take(MAX).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frames() {
        assert_eq!(
            parse_line(r#"{"type":"chunk","content":"Hel"}"#).unwrap(),
            RawEvent::chunk("Hel")
        );
        assert_eq!(
            parse_line(r#"{"type":"complete","done":true}"#).unwrap(),
            RawEvent::Complete
        );
        assert_eq!(
            parse_line(r#"{"type":"error","error":"boom","done":true}"#).unwrap(),
            RawEvent::error("boom")
        );
    }

    #[test]
    fn test_error_without_message_gets_default() {
        assert_eq!(
            parse_line(r#"{"type":"error"}"#).unwrap(),
            RawEvent::error("Unknown agent error")
        );
    }

    #[test]
    fn test_malformed_frames() {
        for line in [
            "not json",
            r#"{"content":"no type"}"#,
            r#"{"type":"chunk"}"#,
            r#"{"type":"progress","content":"50%"}"#,
        ] {
            let err = parse_line(line).unwrap_err();
            assert!(
                matches!(err, ProducerError::MalformedEvent(_)),
                "expected malformed for {line}: {err:?}"
            );
        }
    }

    #[test]
    fn test_truncate_long_lines() {
        let long = "x".repeat(200);
        assert_eq!(truncate(&long).len(), 83);
    }
}
