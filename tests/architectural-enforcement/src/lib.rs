//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in `tests/`. They enforce
//! rules the compiler cannot:
//! - No sleeping in production code; wait on I/O, timers or notifications
//! - No `unwrap()` / `expect()` in production code; propagate or log errors
//! - No `println!` / `eprintln!` in the core library; log through `tracing`
//!
//! Only production code is scanned: everything from a file's `#[cfg(test)]`
//! test module onwards is ignored, as are comments.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/cli/src"];

/// A rule violation at a specific line
#[derive(Debug, Clone)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, derived from this crate's location
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Code portion of a line, with any `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Production lines of a source file as `(line_number, line)` pairs
///
/// Stops at the first `#[cfg(test)]` test module.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let lines: Vec<&str> = content.lines().collect();
    let end = lines
        .windows(2)
        .position(|pair| {
            pair[0].trim_start().starts_with("#[cfg(test)]")
                && pair[1].trim_start().starts_with("mod ")
        })
        .unwrap_or(lines.len());

    lines[..end]
        .iter()
        .enumerate()
        .map(|(idx, line)| (idx + 1, *line))
        .collect()
}

/// Scan every `.rs` file under `dir` for production lines matching `is_violation`
///
/// `is_violation` receives the code part of each line.
pub fn scan_directory(dir: &Path, is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (line_number, line) in production_lines(&content) {
            if is_violation(code_part(line)) {
                violations.push(Violation {
                    path: entry.path().to_path_buf(),
                    line: line_number,
                    text: line.trim().to_string(),
                });
            }
        }
    }

    violations
}

/// Scan all production directories
#[must_use]
pub fn scan_production(is_violation: impl Fn(&str) -> bool + Copy) -> Vec<Violation> {
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_directory(&workspace_root().join(dir), is_violation))
        .collect()
}

/// Sleep calls
#[must_use]
pub fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

/// Panicking unwraps
#[must_use]
pub fn is_unwrap_call(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

/// Direct console printing
#[must_use]
pub fn is_console_print(code: &str) -> bool {
    code.contains("println!(") || code.contains("print!(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\nfn b() {}\n#[cfg(test)]\nmod tests { fn c() { x.unwrap(); } }\n";
        let lines = production_lines(content);
        assert_eq!(lines, vec![(1, "fn a() {}"), (2, "fn b() {}")]);
    }

    #[test]
    fn test_test_only_items_do_not_end_scan() {
        let content = "#[cfg(test)]\nfn helper() {}\nfn a() { x.unwrap(); }\n";
        assert_eq!(production_lines(content).len(), 3);
    }

    #[test]
    fn test_comments_are_ignored() {
        assert_eq!(code_part("let x = 1; // then .unwrap()"), "let x = 1; ");
        assert!(!is_unwrap_call(code_part("/// Call `.expect(` here")));
    }

    #[test]
    fn test_detectors() {
        assert!(is_sleep_call("tokio::time::sleep(d).await"));
        assert!(is_sleep_call("std::thread::sleep(d)"));
        assert!(!is_sleep_call("tokio::time::timeout(d, f)"));

        assert!(is_unwrap_call("value.unwrap()"));
        assert!(is_unwrap_call("value.expect(\"msg\")"));
        assert!(!is_unwrap_call("value.unwrap_or(0)"));
        assert!(!is_unwrap_call("value.unwrap_or_else(|| 0)"));

        assert!(is_console_print("println!(\"hi\")"));
        assert!(is_console_print("eprintln!(\"hi\")"));
        assert!(!is_console_print("tracing::info!(\"hi\")"));
    }
}
