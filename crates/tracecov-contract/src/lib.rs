// SPDX-License-Identifier: AGPL-3.0

//! Bytecode disassembly and program-counter coverage matching

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use tracecov_exceptions::{
    CoverageException, CoverageResult, InvalidBytecodeFormatError, UnknownProgramCounter,
};
use tracecov_logs::{warn_code, ErrorCode};
use tracecov_opcodes::Opcode;
use tracecov_traces::{hexify, FunctionId, StepRecord};

/// Hex width of an unlinked library placeholder (`__LibName___…` or `__$hash$__`)
pub const PLACEHOLDER_HEX_LEN: usize = 40;

/// A decoded stretch of bytecode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSegment {
    Bytes(Vec<u8>),
    /// A 20-byte address slot the linker has not filled yet
    Placeholder,
}

/// Splits bytecode hex into concrete bytes and unlinked placeholder slots
pub fn decode_segments(hexcode: &str) -> CoverageResult<Vec<CodeSegment>> {
    let digits = hexcode
        .strip_prefix("0x")
        .ok_or_else(|| InvalidBytecodeFormatError::new(hexcode))?;

    let mut segments = Vec::new();
    let mut rest = digits;
    while !rest.is_empty() {
        if rest.starts_with("__") {
            rest = rest.get(PLACEHOLDER_HEX_LEN..).ok_or_else(|| {
                CoverageException::InvalidHex(format!("truncated library placeholder: {}", rest))
            })?;
            segments.push(CodeSegment::Placeholder);
            continue;
        }

        let end = rest.find("__").unwrap_or(rest.len());
        let chunk = &rest[..end];
        if chunk.len() % 2 != 0 {
            return Err(CoverageException::InvalidHex(format!(
                "odd number of digits before offset {}",
                digits.len() - rest.len() + end
            )));
        }
        let bytes =
            hex::decode(chunk).map_err(|e| CoverageException::InvalidHex(e.to_string()))?;
        segments.push(CodeSegment::Bytes(bytes));
        rest = &rest[end..];
    }
    Ok(segments)
}

/// Decodes `0x`-prefixed bytecode; unlinked placeholders decode as zero addresses
pub fn decode_bytecode(hexcode: &str) -> CoverageResult<Vec<u8>> {
    let mut code = Vec::with_capacity(hexcode.len() / 2);
    for segment in decode_segments(hexcode)? {
        match segment {
            CodeSegment::Bytes(bytes) => code.extend_from_slice(&bytes),
            CodeSegment::Placeholder => code.extend_from_slice(&[0u8; 20]),
        }
    }
    Ok(code)
}

/// Length of the trailing compiler metadata section, if one is present.
///
/// solc appends a CBOR map followed by its own length as a big-endian u16.
pub fn metadata_len(code: &[u8]) -> Option<usize> {
    let n = code.len();
    if n < 2 {
        return None;
    }
    let cbor_len = usize::from(u16::from_be_bytes([code[n - 2], code[n - 1]]));
    let total = cbor_len.checked_add(2)?;
    if cbor_len == 0 || total > n {
        return None;
    }
    // CBOR map header with up to 23 entries
    (0xa0..=0xb7)
        .contains(&code[n - total])
        .then_some(total)
}

/// Code with its metadata trailer removed
pub fn strip_metadata(code: &[u8]) -> &[u8] {
    match metadata_len(code) {
        Some(len) => &code[..code.len() - len],
        None => code,
    }
}

/// One disassembled instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub pc: usize,
    pub opcode: Opcode,
    pub operand: Option<Vec<u8>>,
    pub hit_count: usize,
}

impl Instruction {
    /// Returns the length of this instruction in bytes
    pub fn len(&self) -> usize {
        self.opcode.insn_len()
    }

    pub fn is_hit(&self) -> bool {
        self.hit_count > 0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, hexify(operand)),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// Ordered instructions plus a sparse pc lookup
#[derive(Debug, Clone, Default)]
pub struct Disassembly {
    pub instructions: Vec<Instruction>,
    pc_index: HashMap<usize, usize>,
}

impl Disassembly {
    /// Decodes raw code.
    ///
    /// `Some(n)` stops after `n` instructions. `None` drops the compiler
    /// metadata trailer first, so its bytes are not counted as code.
    pub fn from_code(code: &[u8], byte_length: Option<usize>) -> Self {
        let (code, limit) = match byte_length {
            Some(limit) => (code, limit),
            None => (strip_metadata(code), usize::MAX),
        };

        let mut instructions = Vec::new();
        let mut pc_index = HashMap::new();
        let mut pc = 0;
        while pc < code.len() && instructions.len() < limit {
            let opcode = Opcode::from_byte(code[pc]);
            let width = opcode.push_size();
            let operand = (width > 0).then(|| {
                let start = (pc + 1).min(code.len());
                let end = (pc + 1 + width).min(code.len());
                // pushes truncated by the end of code read as zero-padded
                let mut operand = code[start..end].to_vec();
                operand.resize(width, 0);
                operand
            });

            pc_index.insert(pc, instructions.len());
            instructions.push(Instruction {
                pc,
                opcode,
                operand,
                hit_count: 0,
            });
            pc += opcode.insn_len();
        }

        Self {
            instructions,
            pc_index,
        }
    }

    pub fn index_of(&self, pc: usize) -> Option<usize> {
        self.pc_index.get(&pc).copied()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.index_of(pc).map(|i| &self.instructions[i])
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Disassembles `0x`-prefixed bytecode
pub fn disassemble(bytecode: &str, byte_length: Option<usize>) -> CoverageResult<Disassembly> {
    let code = decode_bytecode(bytecode)?;
    Ok(Disassembly::from_code(&code, byte_length))
}

/// Hit counts together with the steps that matched nothing
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub instructions: Vec<Instruction>,
    pub unknown: Vec<UnknownProgramCounter>,
}

/// Counts how often each instruction of `bytecode` was executed by `steps`.
///
/// Disassembles fresh on every call. Steps whose pc has no instruction are
/// skipped and reported under `label`, which names the code being matched.
pub fn match_used_opcodes_detailed(
    label: &str,
    bytecode: &str,
    steps: &[StepRecord],
    byte_length: Option<usize>,
) -> CoverageResult<MatchOutcome> {
    let mut disassembly = disassemble(bytecode, byte_length)?;
    let mut unknown = Vec::new();

    for step in steps {
        match disassembly.index_of(step.pc) {
            Some(index) => disassembly.instructions[index].hit_count += 1,
            None => {
                let diagnostic = UnknownProgramCounter {
                    pc: step.pc,
                    depth: step.depth,
                };
                warn_code(
                    ErrorCode::UnknownProgramCounter,
                    &format!("{}: {}", label, diagnostic),
                    false,
                );
                unknown.push(diagnostic);
            }
        }
    }

    Ok(MatchOutcome {
        instructions: disassembly.instructions,
        unknown,
    })
}

pub fn match_used_opcodes(
    bytecode: &str,
    steps: &[StepRecord],
    byte_length: Option<usize>,
) -> CoverageResult<Vec<Instruction>> {
    Ok(match_used_opcodes_detailed("bytecode", bytecode, steps, byte_length)?.instructions)
}

/// Number of instructions executed at least once
pub fn count_used(instructions: &[Instruction]) -> usize {
    instructions.iter().filter(|insn| insn.is_hit()).count()
}

pub fn coverage_percent(used: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * used as f64 / total as f64
}

/// How many recorded invocations hit each declared function
pub fn match_called_functions(
    functions: &IndexMap<String, FunctionId>,
    calls: &[FunctionId],
) -> IndexMap<String, usize> {
    functions
        .iter()
        .map(|(signature, id)| {
            let count = calls.iter().filter(|call| *call == id).count();
            (signature.clone(), count)
        })
        .collect()
}
