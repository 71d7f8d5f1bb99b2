// SPDX-License-Identifier: AGPL-3.0

//! File-backed node provider replaying a recorded session

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracecov_coverage::{NodeProvider, TransactionReceipt};
use tracecov_traces::{Address, ExecutionStep};

/// A debugger trace as recorded: either the full `debug_traceTransaction`
/// result or a bare list of struct logs
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RecordedTrace {
    Debugger {
        #[serde(rename = "structLogs")]
        struct_logs: Vec<ExecutionStep>,
    },
    Steps(Vec<ExecutionStep>),
}

impl RecordedTrace {
    fn into_steps(self) -> Vec<ExecutionStep> {
        match self {
            RecordedTrace::Debugger { struct_logs } => struct_logs,
            RecordedTrace::Steps(steps) => steps,
        }
    }
}

/// One transaction in replay order. `to` is absent for deployments, whose
/// `input` is then the creation code.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedTransaction {
    pub hash: String,
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub input: String,
}

impl RecordedTransaction {
    pub fn input_bytes(&self) -> Result<Vec<u8>> {
        let digits = self.input.strip_prefix("0x").unwrap_or(&self.input);
        hex::decode(digits).with_context(|| format!("Invalid input of transaction {}", self.hash))
    }

    /// Creation code with the `0x` prefix the identifier expects
    pub fn creation_code(&self) -> String {
        if self.input.starts_with("0x") {
            self.input.clone()
        } else {
            format!("0x{}", self.input)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    #[serde(default)]
    code: HashMap<Address, String>,
    #[serde(default)]
    traces: HashMap<String, RecordedTrace>,
    #[serde(default)]
    receipts: HashMap<String, TransactionReceipt>,
    #[serde(default)]
    transactions: Vec<RecordedTransaction>,
}

pub struct ReplayProvider {
    code: HashMap<Address, String>,
    traces: HashMap<String, Vec<ExecutionStep>>,
    receipts: HashMap<String, TransactionReceipt>,
}

/// Loads a session file into a provider and its transactions in order
pub fn load_session(path: &Path) -> Result<(ReplayProvider, Vec<RecordedTransaction>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {:?}", path))?;
    parse_session(&content).with_context(|| format!("Failed to parse session file: {:?}", path))
}

pub fn parse_session(content: &str) -> Result<(ReplayProvider, Vec<RecordedTransaction>)> {
    let session: SessionFile = serde_json::from_str(content)?;
    let provider = ReplayProvider {
        code: session.code,
        traces: session
            .traces
            .into_iter()
            .map(|(hash, trace)| (hash.to_lowercase(), trace.into_steps()))
            .collect(),
        receipts: session
            .receipts
            .into_iter()
            .map(|(hash, receipt)| (hash.to_lowercase(), receipt))
            .collect(),
    };
    Ok((provider, session.transactions))
}

impl NodeProvider for ReplayProvider {
    fn get_bytecode_at(&self, address: &Address) -> Result<String> {
        Ok(self
            .code
            .get(address)
            .cloned()
            .unwrap_or_else(|| "0x".to_string()))
    }

    fn get_execution_trace(&self, tx_hash: &str) -> Result<Vec<ExecutionStep>> {
        self.traces
            .get(&tx_hash.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow!("no recorded trace for {}", tx_hash))
    }

    fn get_transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt> {
        self.receipts
            .get(&tx_hash.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow!("no recorded receipt for {}", tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracecov_traces::Opcode;

    fn session_json() -> String {
        json!({
            "code": {
                "0x00000000000000000000000000000000000000C0": "0x60ff00"
            },
            "traces": {
                "0xAB": {
                    "gas": 21000,
                    "failed": false,
                    "returnValue": "",
                    "structLogs": [
                        {"pc": 0, "op": "PUSH1", "gas": 100, "gasCost": 3, "depth": 1, "stack": []},
                        {"pc": 2, "op": "STOP", "gas": 97, "gasCost": 0, "depth": 1, "stack": ["0xff"]}
                    ]
                },
                "0xcd": [
                    {"pc": 0, "op": "STOP", "depth": 1}
                ]
            },
            "receipts": {
                "0xcd": {"contractAddress": "0x00000000000000000000000000000000000000c0"}
            },
            "transactions": [
                {"hash": "0xcd", "from": "0x0000000000000000000000000000000000000001", "input": "600a00"},
                {"hash": "0xab", "to": "0x00000000000000000000000000000000000000c0", "input": "0xd09de08a"}
            ]
        })
        .to_string()
    }

    fn address(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address(bytes)
    }

    #[test]
    fn test_parse_session() {
        let (provider, transactions) = parse_session(&session_json()).unwrap();

        assert_eq!(provider.get_bytecode_at(&address(0xc0)).unwrap(), "0x60ff00");
        assert_eq!(provider.get_bytecode_at(&address(0xc1)).unwrap(), "0x");

        let trace = provider.get_execution_trace("0xab").unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].op, Opcode::Stop);
        assert_eq!(trace[1].top_of_stack().unwrap().as_usize(), Some(0xff));
        assert_eq!(provider.get_execution_trace("0xCD").unwrap().len(), 1);

        let receipt = provider.get_transaction_receipt("0xcd").unwrap();
        assert_eq!(receipt.created_address, Some(address(0xc0)));

        assert_eq!(transactions.len(), 2);
        assert!(transactions[0].to.is_none());
        assert_eq!(transactions[0].creation_code(), "0x600a00");
        assert_eq!(transactions[1].to, Some(address(0xc0)));
        assert_eq!(
            transactions[1].input_bytes().unwrap(),
            vec![0xd0, 0x9d, 0xe0, 0x8a]
        );
    }

    #[test]
    fn test_missing_records() {
        let (provider, _) = parse_session("{}").unwrap();
        let err = provider.get_execution_trace("0x01").unwrap_err();
        assert_eq!(err.to_string(), "no recorded trace for 0x01");
        assert!(provider.get_transaction_receipt("0x01").is_err());
    }

    #[test]
    fn test_invalid_input() {
        let tx = RecordedTransaction {
            hash: "0x01".to_string(),
            from: None,
            to: None,
            input: "0xzz".to_string(),
        };
        assert!(tx.input_bytes().is_err());
    }
}
