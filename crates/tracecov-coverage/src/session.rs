// SPDX-License-Identifier: AGPL-3.0

use crate::accumulator::CoverageAccumulator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracecov_build::ArtifactLibrary;
use tracecov_logs::{debug, warn_code, ErrorCode};
use tracecov_traces::{separate_trace, Address, CallTree, ContextKind, ExecutionStep, FunctionId};

/// Receipt fields the session needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(default, rename = "contractAddress", alias = "createdAddress")]
    pub created_address: Option<Address>,
}

/// Node queries the coverage core depends on
pub trait NodeProvider {
    /// Runtime code deployed at `address`, `0x`-prefixed
    fn get_bytecode_at(&self, address: &Address) -> Result<String>;

    /// Per-instruction debugger trace of a mined transaction
    fn get_execution_trace(&self, tx_hash: &str) -> Result<Vec<ExecutionStep>>;

    fn get_transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt>;
}

/// Ingestion state of one coverage run
pub struct CoverageSession<P: NodeProvider> {
    provider: P,
    pub library: ArtifactLibrary,
    pub accumulator: CoverageAccumulator,
}

impl<P: NodeProvider> CoverageSession<P> {
    pub fn new(provider: P, library: ArtifactLibrary) -> Self {
        Self {
            provider,
            library,
            accumulator: CoverageAccumulator::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Records the selector of a message call.
    ///
    /// Creations (no `to`) and plain transfers (input shorter than a
    /// selector) are not function calls.
    pub fn on_message_call(&mut self, from: Option<Address>, to: Option<Address>, input: &[u8]) {
        let Some(to) = to else {
            return;
        };
        if input.len() < 4 {
            debug(
                &format!(
                    "not a contract call: {} -> {} ({} bytes)",
                    from.map(|a| a.to_string()).unwrap_or_default(),
                    to,
                    input.len()
                ),
                true,
            );
            return;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&input[..4]);
        self.accumulator
            .record_selector(to, FunctionId::Selector(selector));
    }

    /// Ingests a deployment transaction.
    ///
    /// The new address comes from the receipt; the creation code identifies
    /// the artifact. Returns the created address, or `None` when the
    /// deployment produced no contract. Nothing is bound or recorded when the
    /// creation trace is unbalanced.
    pub fn on_contract_creation(
        &mut self,
        tx_hash: &str,
        creation_bytecode: &str,
    ) -> Result<Option<Address>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .with_context(|| format!("Failed to fetch receipt of {}", tx_hash))?;
        let Some(address) = receipt.created_address else {
            debug(&format!("{} created no contract", tx_hash), true);
            return Ok(None);
        };

        let trace = self
            .provider
            .get_execution_trace(tx_hash)
            .with_context(|| format!("Failed to fetch trace of {}", tx_hash))?;
        let tree = separate_trace(&trace)?;

        self.library.find_by_code_hash(creation_bytecode, address)?;
        self.accumulator.record_creation(address);
        self.ingest_tree(address, tree, ContextKind::Create)?;
        Ok(Some(address))
    }

    /// Ingests a message-call transaction to `to`
    pub fn on_transaction(&mut self, tx_hash: &str, to: Address) -> Result<CallTree> {
        let trace = self
            .provider
            .get_execution_trace(tx_hash)
            .with_context(|| format!("Failed to fetch trace of {}", tx_hash))?;
        self.on_trace_available(to, &trace, ContextKind::Function)
    }

    /// Separates `trace`, files its contexts and tries to identify every
    /// address it touched that is not bound to an artifact yet.
    ///
    /// An unbalanced trace is rejected as a whole and nothing is recorded.
    pub fn on_trace_available(
        &mut self,
        address: Address,
        trace: &[ExecutionStep],
        kind: ContextKind,
    ) -> Result<CallTree> {
        let tree = separate_trace(trace)?;
        self.ingest_tree(address, tree, kind)
    }

    fn ingest_tree(
        &mut self,
        address: Address,
        tree: CallTree,
        kind: ContextKind,
    ) -> Result<CallTree> {
        let touched = self.accumulator.record_call_tree(&tree, address, kind);

        for touched_address in touched {
            if self.library.exists(&touched_address) {
                continue;
            }
            let code = match self.provider.get_bytecode_at(&touched_address) {
                Ok(code) => code,
                Err(e) => {
                    warn_code(
                        ErrorCode::UnresolvedContract,
                        &format!("cannot fetch code at {}: {:#}", touched_address, e),
                        false,
                    );
                    continue;
                }
            };
            // accounts without code (pending creations, EOAs)
            if code.len() <= 2 {
                continue;
            }
            self.library.find_by_code_hash(&code, touched_address)?;
        }
        Ok(tree)
    }
}
