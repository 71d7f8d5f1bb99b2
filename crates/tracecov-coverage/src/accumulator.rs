// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;
use tracecov_logs::{debug_code, ErrorCode};
use tracecov_traces::{Address, CallTree, ContextKind, FunctionId, StepRecord};

/// Everything recorded for one address
#[derive(Debug, Clone, Default)]
pub struct AddressCoverage {
    /// Step sequences per context kind, one per recorded context
    pub traces: HashMap<ContextKind, Vec<Vec<StepRecord>>>,
    /// Invoked selectors in order, duplicates kept
    pub selectors: Vec<FunctionId>,
}

/// Append-only store of contexts and selectors, keyed by address
#[derive(Debug, Clone, Default)]
pub struct CoverageAccumulator {
    entries: HashMap<Address, AddressCoverage>,
}

impl CoverageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, address: Address) -> &mut AddressCoverage {
        self.entries.entry(address).or_default()
    }

    pub fn add_trace(&mut self, address: Address, kind: ContextKind, steps: Vec<StepRecord>) {
        self.entry(address)
            .traces
            .entry(kind)
            .or_default()
            .push(steps);
    }

    pub fn record_selector(&mut self, address: Address, selector: FunctionId) {
        self.entry(address).selectors.push(selector);
    }

    /// One constructor invocation at `address`
    pub fn record_creation(&mut self, address: Address) {
        self.record_selector(address, FunctionId::Create);
    }

    /// Files every context of `tree` under the address it executed as.
    ///
    /// The base context belongs to the transaction's own target
    /// (`root_address`, `root_kind`). Each child also records its selector at
    /// the callee. Children whose address never resolved are dropped.
    /// Returns the addresses touched, in discovery order.
    pub fn record_call_tree(
        &mut self,
        tree: &CallTree,
        root_address: Address,
        root_kind: ContextKind,
    ) -> Vec<Address> {
        let mut touched = vec![root_address];
        self.add_trace(root_address, root_kind, tree.base().steps.clone());

        for child in tree.children() {
            let Some(address) = child.address.resolved() else {
                debug_code(
                    ErrorCode::UnresolvedContract,
                    &format!(
                        "dropping {} context with {} address ({} steps)",
                        child.function_id,
                        child.address,
                        child.steps.len()
                    ),
                    true,
                );
                continue;
            };
            self.add_trace(address, child.kind, child.steps.clone());
            self.record_selector(address, child.function_id);
            if !touched.contains(&address) {
                touched.push(address);
            }
        }
        touched
    }

    pub fn get(&self, address: &Address) -> Option<&AddressCoverage> {
        self.entries.get(address)
    }

    /// Addresses with any record, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.entries.keys().copied().collect();
        addresses.sort();
        addresses
    }

    /// All steps of `kind` recorded at any of `addresses`, flattened
    pub fn steps_for(&self, addresses: &[Address], kind: ContextKind) -> Vec<StepRecord> {
        addresses
            .iter()
            .filter_map(|address| self.entries.get(address))
            .filter_map(|coverage| coverage.traces.get(&kind))
            .flatten()
            .flatten()
            .copied()
            .collect()
    }

    /// All selectors recorded at any of `addresses`, flattened
    pub fn selectors_for(&self, addresses: &[Address]) -> Vec<FunctionId> {
        addresses
            .iter()
            .filter_map(|address| self.entries.get(address))
            .flat_map(|coverage| coverage.selectors.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracecov_traces::{separate_trace, ExecutionStep, Opcode, Word};

    fn address(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address(bytes)
    }

    fn record(pc: usize) -> StepRecord {
        StepRecord {
            depth: 1,
            op: Opcode::Jumpdest,
            pc,
        }
    }

    #[test]
    fn test_append_only_keeps_duplicates() {
        let mut acc = CoverageAccumulator::new();
        acc.add_trace(address(1), ContextKind::Function, vec![record(0)]);
        acc.add_trace(address(1), ContextKind::Function, vec![record(0), record(1)]);
        acc.record_selector(address(1), FunctionId::Selector([1, 2, 3, 4]));
        acc.record_selector(address(1), FunctionId::Selector([1, 2, 3, 4]));
        acc.record_creation(address(1));

        let entry = acc.get(&address(1)).unwrap();
        assert_eq!(entry.traces[&ContextKind::Function].len(), 2);
        assert_eq!(entry.selectors.len(), 3);
        assert_eq!(entry.selectors[2], FunctionId::Create);
        assert_eq!(acc.steps_for(&[address(1)], ContextKind::Function).len(), 3);
        assert!(acc.steps_for(&[address(1)], ContextKind::Create).is_empty());
    }

    #[test]
    fn test_merges_addresses() {
        let mut acc = CoverageAccumulator::new();
        acc.add_trace(address(1), ContextKind::Function, vec![record(0)]);
        acc.add_trace(address(2), ContextKind::Function, vec![record(5)]);
        acc.record_selector(address(2), FunctionId::Fallback);

        let steps = acc.steps_for(&[address(1), address(2), address(3)], ContextKind::Function);
        assert_eq!(steps.iter().map(|s| s.pc).collect::<Vec<_>>(), vec![0, 5]);
        assert_eq!(acc.selectors_for(&[address(1), address(2)]), vec![FunctionId::Fallback]);
        assert_eq!(acc.addresses(), vec![address(1), address(2)]);
    }

    #[test]
    fn test_record_call_tree() {
        let callee: Word = "0x00000000000000000000000000000000000000000000000000000000000000aa"
            .parse()
            .unwrap();
        let memory: Word = "0x00000000000000000000000000000000000000000000000000000000a9059cbb"
            .parse()
            .unwrap();
        let stack: Vec<Word> = ["0x24", "0x1c", "0x0"]
            .iter()
            .map(|w| w.parse().unwrap())
            .chain([callee, "0xffff".parse().unwrap()])
            .collect();

        let trace = vec![
            ExecutionStep::new(1, Opcode::Call, 0)
                .with_stack(stack)
                .with_memory(vec![memory]),
            ExecutionStep::new(2, Opcode::Stop, 0),
            // no stack: address stays unknown
            ExecutionStep::new(1, Opcode::Call, 1),
            ExecutionStep::new(2, Opcode::Stop, 0),
            ExecutionStep::new(1, Opcode::Stop, 2),
        ];
        let tree = separate_trace(&trace).unwrap();

        let mut acc = CoverageAccumulator::new();
        let touched = acc.record_call_tree(&tree, address(1), ContextKind::Function);
        assert_eq!(touched, vec![address(1), address(0xaa)]);

        assert_eq!(acc.steps_for(&[address(1)], ContextKind::Function).len(), 3);
        let callee_entry = acc.get(&address(0xaa)).unwrap();
        assert_eq!(callee_entry.traces[&ContextKind::Function][0].len(), 1);
        assert_eq!(
            callee_entry.selectors,
            vec![FunctionId::Selector([0xa9, 0x05, 0x9c, 0xbb])]
        );
        assert!(acc.get(&address(1)).unwrap().selectors.is_empty());
    }
}
