// SPDX-License-Identifier: AGPL-3.0

//! Debugger trace model and call-tree reconstruction
//!
//! A debugger emits one [`ExecutionStep`] per executed instruction. The
//! separator walks that flat log with an explicit call stack and files every
//! step under the call context that executed it.

mod analyzer;
mod render;
mod separator;

pub use analyzer::{analyze_call_target, CallTarget};
pub use render::{render_call_tree, rendered_address, rendered_function_id};
pub use separator::separate_trace;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracecov_exceptions::{CoverageException, CoverageResult};
pub use tracecov_opcodes::Opcode;

/// Convert bytes to hex string
pub fn hexify(data: &[u8]) -> String {
    if data.is_empty() {
        return "0x".to_string();
    }
    format!("0x{}", hex::encode(data))
}

fn decode_hex_padded<const N: usize>(text: &str) -> CoverageResult<[u8; N]> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.len() > N * 2 {
        return Err(CoverageException::InvalidHex(format!(
            "{} is wider than {} bytes",
            text, N
        )));
    }
    let padded = format!("{:0>width$}", digits, width = N * 2);
    let mut out = [0u8; N];
    hex::decode_to_slice(&padded, &mut out)
        .map_err(|e| CoverageException::InvalidHex(format!("{}: {}", text, e)))?;
    Ok(out)
}

/// A 256-bit stack or memory word, big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Word(pub [u8; 32]);

impl Word {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Value as a machine offset, `None` when it does not fit
    pub fn as_usize(&self) -> Option<usize> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        usize::try_from(u64::from_be_bytes(low)).ok()
    }

    /// Low 20 bytes
    pub fn to_address(&self) -> Address {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&self.0[12..]);
        Address(addr)
    }

    /// High 4 bytes, where a CALLDATALOAD at offset 0 places the selector
    pub fn leading_selector(&self) -> [u8; 4] {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&self.0[..4]);
        selector
    }
}

impl FromStr for Word {
    type Err = CoverageException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex_padded::<32>(s).map(Word)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A 20-byte account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl FromStr for Address {
    type Err = CoverageException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex_padded::<20>(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One debugger record, captured before the instruction executes.
///
/// Field names follow the `structLogs` entries of `debug_traceTransaction`.
/// The stack is bottom-first; memory is a list of 32-byte words. Either may
/// be omitted by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub depth: usize,
    pub op: Opcode,
    pub pc: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<Word>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<Word>>,
}

impl ExecutionStep {
    pub fn new(depth: usize, op: Opcode, pc: usize) -> Self {
        Self {
            depth,
            op,
            pc,
            stack: None,
            memory: None,
        }
    }

    pub fn with_stack(mut self, stack: Vec<Word>) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn with_memory(mut self, memory: Vec<Word>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn top_of_stack(&self) -> Option<&Word> {
        self.stack.as_ref().and_then(|stack| stack.last())
    }

    pub fn record(&self) -> StepRecord {
        StepRecord {
            depth: self.depth,
            op: self.op,
            pc: self.pc,
        }
    }
}

/// A step reduced to what coverage matching needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepRecord {
    pub depth: usize,
    pub op: Opcode,
    pub pc: usize,
}

/// Which function a context runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionId {
    /// The transaction's own entry context
    Base,
    Selector([u8; 4]),
    /// Constructor run of a CREATE/CREATE2
    Create,
    /// Not recoverable at the call site
    Unknown,
    /// Input shorter than a selector; routed to fallback/receive
    Fallback,
}

impl FunctionId {
    pub fn is_unknown(&self) -> bool {
        matches!(self, FunctionId::Unknown)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Base => f.write_str("base"),
            FunctionId::Selector(selector) => write!(f, "{}", hexify(selector)),
            FunctionId::Create => f.write_str("create"),
            FunctionId::Unknown => f.write_str("unknown"),
            FunctionId::Fallback => f.write_str("fallback"),
        }
    }
}

/// Who a context executes as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextAddress {
    Base,
    Resolved(Address),
    /// The call site carried no stack snapshot
    Unknown,
    /// A creation whose address is not known yet, or that failed
    Pending,
}

impl ContextAddress {
    pub fn resolved(&self) -> Option<Address> {
        match self {
            ContextAddress::Resolved(address) => Some(*address),
            _ => None,
        }
    }
}

impl fmt::Display for ContextAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextAddress::Base => f.write_str("base"),
            ContextAddress::Resolved(address) => write!(f, "{}", address),
            ContextAddress::Unknown => f.write_str("unknown"),
            ContextAddress::Pending => f.write_str("pending"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Base,
    Function,
    Create,
}

/// One invocation carved out of the flat trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub address: ContextAddress,
    pub function_id: FunctionId,
    pub kind: ContextKind,
    /// Index of the calling context, `None` for base
    pub parent: Option<usize>,
    pub steps: Vec<StepRecord>,
}

impl CallContext {
    pub fn base() -> Self {
        Self {
            address: ContextAddress::Base,
            function_id: FunctionId::Base,
            kind: ContextKind::Base,
            parent: None,
            steps: Vec::new(),
        }
    }

    pub fn child(target: CallTarget, kind: ContextKind, parent: usize) -> Self {
        Self {
            address: target.address,
            function_id: target.function_id,
            kind,
            parent: Some(parent),
            steps: Vec::new(),
        }
    }

    /// Nesting level below base
    pub fn nesting(&self, tree: &CallTree) -> usize {
        let mut level = 0;
        let mut parent = self.parent;
        while let Some(index) = parent {
            level += 1;
            parent = tree.contexts.get(index).and_then(|ctx| ctx.parent);
        }
        level
    }
}

/// Contexts in discovery order, base first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTree {
    pub contexts: Vec<CallContext>,
}

impl CallTree {
    pub fn base(&self) -> &CallContext {
        &self.contexts[0]
    }

    /// Every context except base
    pub fn children(&self) -> &[CallContext] {
        &self.contexts[1..]
    }

    /// Direct callees of the context at `index`
    pub fn callees(&self, index: usize) -> impl Iterator<Item = (usize, &CallContext)> {
        self.contexts
            .iter()
            .enumerate()
            .filter(move |(_, ctx)| ctx.parent == Some(index))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Total steps across all contexts
    pub fn step_count(&self) -> usize {
        self.contexts.iter().map(|ctx| ctx.steps.len()).sum()
    }
}
