// SPDX-License-Identifier: AGPL-3.0

//! Run outcome and process exit codes

use serde::Serialize;
use std::time::Duration;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exitcode {
    Pass = 0,
    NothingProcessed = 1,
    RejectedTrace = 2,
    FailedTransaction = 3,
}

/// How many replayed transactions did not make it into the coverage data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayTally {
    /// Traces rejected as unbalanced
    pub rejected: usize,
    /// Transactions that failed for any other reason
    pub failed: usize,
}

/// Outcome of one replay run
#[derive(Debug, Clone, Serialize)]
pub struct MainResult {
    pub exitcode: i32,
    pub total_transactions: usize,
    pub total_rejected: usize,
    pub total_failed: usize,
    pub total_reported: usize,
    #[serde(skip)]
    pub duration: Duration,
}

impl MainResult {
    pub fn empty(exitcode: Exitcode) -> Self {
        Self {
            exitcode: exitcode as i32,
            total_transactions: 0,
            total_rejected: 0,
            total_failed: 0,
            total_reported: 0,
            duration: Duration::from_secs(0),
        }
    }

    pub fn has_rejections(&self) -> bool {
        self.total_rejected > 0
    }

    /// Exit code for a run that replayed its transactions
    pub fn exitcode_for(total_transactions: usize, tally: &ReplayTally) -> Exitcode {
        if tally.rejected > 0 {
            Exitcode::RejectedTrace
        } else if tally.failed > 0 {
            Exitcode::FailedTransaction
        } else if total_transactions == 0 {
            Exitcode::NothingProcessed
        } else {
            Exitcode::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exitcode_values() {
        assert_eq!(Exitcode::Pass as i32, 0);
        assert_eq!(Exitcode::NothingProcessed as i32, 1);
        assert_eq!(Exitcode::RejectedTrace as i32, 2);
        assert_eq!(Exitcode::FailedTransaction as i32, 3);
    }

    #[test]
    fn test_main_result() {
        let result = MainResult::empty(Exitcode::NothingProcessed);
        assert!(!result.has_rejections());
        assert_eq!(result.exitcode, 1);
    }

    #[test]
    fn test_exitcode_for() {
        let tally = |rejected, failed| ReplayTally { rejected, failed };
        assert_eq!(MainResult::exitcode_for(3, &tally(0, 0)), Exitcode::Pass);
        assert_eq!(MainResult::exitcode_for(3, &tally(1, 0)), Exitcode::RejectedTrace);
        assert_eq!(MainResult::exitcode_for(3, &tally(1, 2)), Exitcode::RejectedTrace);
        assert_eq!(MainResult::exitcode_for(3, &tally(0, 2)), Exitcode::FailedTransaction);
        assert_eq!(MainResult::exitcode_for(0, &tally(0, 0)), Exitcode::NothingProcessed);
    }
}
