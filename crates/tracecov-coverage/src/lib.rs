// SPDX-License-Identifier: AGPL-3.0

//! Coverage accumulation across transactions and per-artifact reporting
//!
//! A [`CoverageSession`] receives transactions from a [`NodeProvider`],
//! splits their traces into call contexts, files the contexts by address and
//! identifies the deployed programs. [`generate_report`] then folds
//! everything recorded into per-artifact instruction and method coverage.

mod accumulator;
mod report;
mod session;

pub use accumulator::{AddressCoverage, CoverageAccumulator};
pub use report::{generate_report, ArtifactCoverage, CodeCoverage, CoverageReport, MethodCoverage};
pub use session::{CoverageSession, NodeProvider, TransactionReceipt};
