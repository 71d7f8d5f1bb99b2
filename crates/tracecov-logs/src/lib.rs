// SPDX-License-Identifier: AGPL-3.0

//! Logging and diagnostic utilities
//!
//! Diagnostics are emitted as `tracing` events; `info` is the user-facing
//! progress channel and prints plain lines to stdout.

use colored::*;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing_subscriber::EnvFilter;

/// Codes attached to recoverable diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownProgramCounter,
    UnresolvedContract,
    ArtifactSkipped,
    DegradedCallTarget,
    UnexpectedTermination,
    InvalidSourceMap,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::UnknownProgramCounter => "unknown-program-counter",
            ErrorCode::UnresolvedContract => "unresolved-contract",
            ErrorCode::ArtifactSkipped => "artifact-skipped",
            ErrorCode::DegradedCallTarget => "degraded-call-target",
            ErrorCode::UnexpectedTermination => "unexpected-termination",
            ErrorCode::InvalidSourceMap => "invalid-source-map",
        }
    }

    pub fn tag(&self) -> String {
        format!("[{}]", self.code())
    }
}

/// Messages already emitted once (for unique logging)
static UNIQUE_MESSAGES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn logged_messages() -> MutexGuard<'static, HashSet<String>> {
    UNIQUE_MESSAGES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Check if a message has been logged (for unique logging)
pub fn is_logged(message: &str) -> bool {
    logged_messages().contains(message)
}

/// Returns true the first time a message is seen; duplicates are let through
/// unconditionally when `allow_duplicate` is set.
fn should_emit(text: &str, allow_duplicate: bool) -> bool {
    if allow_duplicate {
        return true;
    }
    logged_messages().insert(text.to_string())
}

/// Install the stderr subscriber. `RUST_LOG` takes precedence over the
/// verbosity count; calling this more than once is harmless.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Log a debug message
pub fn debug(text: &str, allow_duplicate: bool) {
    if should_emit(text, allow_duplicate) {
        tracing::debug!("{}", text);
    }
}

/// Print a user-facing progress line
pub fn info(text: &str, allow_duplicate: bool) {
    if should_emit(text, allow_duplicate) {
        println!("{}", text);
    }
}

/// Log a warning message
pub fn warn(text: &str, allow_duplicate: bool) {
    if should_emit(text, allow_duplicate) {
        tracing::warn!("{}", text.yellow());
    }
}

/// Log an error message
pub fn error(text: &str, allow_duplicate: bool) {
    if should_emit(text, allow_duplicate) {
        tracing::error!("{}", text.red());
    }
}

/// Log a debug message once (no duplicates)
pub fn debug_once(text: &str) {
    debug(text, false);
}

/// Log a warning tagged with an error code
pub fn warn_code(error_code: ErrorCode, msg: &str, allow_duplicate: bool) {
    let full_msg = format!("{} {}", error_code.tag(), msg);
    warn(&full_msg, allow_duplicate);
}

/// Log a debug message tagged with an error code
pub fn debug_code(error_code: ErrorCode, msg: &str, allow_duplicate: bool) {
    let full_msg = format!("{} {}", error_code.tag(), msg);
    debug(&full_msg, allow_duplicate);
}

/// Log a unique warning (alias for warn with allow_duplicate=false)
pub fn warn_unique(text: &str) {
    warn(text, false);
}

/// Clear all logged messages (useful for testing)
pub fn clear_logged_messages() {
    logged_messages().clear();
}
