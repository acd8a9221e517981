//! Integration Test: Production Code Rules
//!
//! **Policy**: Production code in the relay crates waits on I/O, timers and
//! notifications instead of sleeping, never panics on `unwrap()`/`expect()`,
//! and the core library logs through `tracing` rather than printing.
//!
//! **Exceptions**: test modules (`#[cfg(test)]`) and the `tests/` directories.

use architectural_enforcement::{
    is_console_print, is_sleep_call, is_unwrap_call, scan_directory, scan_production,
    workspace_root, Violation, PRODUCTION_DIRS,
};

fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule} violated in production code:\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of '{rule}'. Fix these before merging!",
        violations.len()
    );
}

/// The scanned directories must exist, or every rule passes vacuously
#[test]
fn test_production_dirs_exist() {
    for dir in PRODUCTION_DIRS {
        let path = workspace_root().join(dir);
        assert!(path.is_dir(), "missing production directory {}", path.display());
    }
}

/// Production code must not sleep
#[test]
fn test_no_sleep_in_production_code() {
    report("No sleep, only wait", &scan_production(is_sleep_call));
}

/// Production code must not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    report("No unwrap/expect", &scan_production(is_unwrap_call));
}

/// The core library must log instead of printing
#[test]
fn test_no_console_output_in_core() {
    let core = workspace_root().join("relay/core/src");
    report(
        "Log through tracing",
        &scan_directory(&core, is_console_print),
    );
}
