// SPDX-License-Identifier: AGPL-3.0

//! Errors raised while decomposing traces and matching coverage.
//!
//! Two families live here. Structural corruption of the input (an unbalanced
//! trace, a bytecode string without its `0x` prefix, analysis of a non-call
//! step) is fatal and surfaces as [`CoverageException`]. Incomplete auxiliary
//! data (an executed pc missing from the disassembly, an address no artifact
//! matches) is recovered; those kinds are plain diagnostic values that get
//! logged and never abort a report.

use thiserror::Error;

/// Fatal errors of the coverage core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoverageException {
    #[error("Invalid trace: {0}")]
    UnbalancedTrace(#[from] UnbalancedTraceError),

    #[error("{0}")]
    NotCallLike(#[from] NotCallLikeError),

    #[error("{0}")]
    InvalidBytecodeFormat(#[from] InvalidBytecodeFormatError),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid source map: {0}")]
    InvalidSourceMap(String),

    #[error("Failed to load artifact: {0}")]
    ArtifactLoad(String),

    #[error("No artifacts match `{0}`")]
    NoArtifactsFound(String),
}

/// Raised when the call stack is still open after the last trace step.
///
/// The trace contains more call-openings than matching terminations, which
/// means it was truncated or is otherwise malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("the trace contains more call-openings than matching terminations ({open_frames} frame(s) left open)")]
pub struct UnbalancedTraceError {
    pub open_frames: usize,
}

/// Raised when call-target analysis is asked to look at a non call-like step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Not call like opcode: {0}")]
pub struct NotCallLikeError(pub String);

/// Raised when a bytecode hex string lacks its `0x` prefix
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("0x hex prefix missing: {0}")]
pub struct InvalidBytecodeFormatError(pub String);

impl InvalidBytecodeFormatError {
    /// Keeps messages readable for multi-kilobyte bytecode strings.
    pub fn new(bytecode: &str) -> Self {
        const SHOWN: usize = 24;
        if bytecode.len() > SHOWN {
            let cut = (0..=SHOWN)
                .rev()
                .find(|i| bytecode.is_char_boundary(*i))
                .unwrap_or(0);
            Self(format!("{}...", &bytecode[..cut]))
        } else {
            Self(bytecode.to_string())
        }
    }
}

/// An executed program counter that has no instruction in the disassembly.
///
/// Recovered: the step is skipped and coverage computation continues.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown program counter: {pc}, depth={depth}")]
pub struct UnknownProgramCounter {
    pub pc: usize,
    pub depth: usize,
}

/// No known artifact matched the bytecode deployed at an address.
///
/// Recovered: the address stays unbound and later attempts are allowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown contract address: {0}")]
pub struct UnresolvedContractAddress(pub String);

/// Result type for coverage-core operations
pub type CoverageResult<T> = Result<T, CoverageException>;
