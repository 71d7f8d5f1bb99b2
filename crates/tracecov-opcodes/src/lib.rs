// SPDX-License-Identifier: AGPL-3.0

//! EVM opcode table and classification
//!
//! [`Opcode`] is a closed enumeration of the instruction set. Traces name
//! opcodes by mnemonic and bytecode encodes them as bytes; both map onto the
//! same enum so the classifier and the disassembler share one table.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

macro_rules! opcode_table {
    ($($variant:ident = $byte:literal => $name:literal),* $(,)?) => {
        /// A single EVM instruction kind
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $($variant,)*
            /// PUSH0..PUSH32, holding the operand width in bytes
            Push(u8),
            /// DUP1..DUP16
            Dup(u8),
            /// SWAP1..SWAP16
            Swap(u8),
            /// LOG0..LOG4, holding the topic count
            Log(u8),
            /// A byte with no assigned instruction
            Unknown(u8),
        }

        impl Opcode {
            /// Decodes a bytecode byte
            pub fn from_byte(byte: u8) -> Self {
                match byte {
                    $($byte => Opcode::$variant,)*
                    0x5f..=0x7f => Opcode::Push(byte - 0x5f),
                    0x80..=0x8f => Opcode::Dup(byte - 0x80 + 1),
                    0x90..=0x9f => Opcode::Swap(byte - 0x90 + 1),
                    0xa0..=0xa4 => Opcode::Log(byte - 0xa0),
                    _ => Opcode::Unknown(byte),
                }
            }

            /// Encodes back to the bytecode byte
            pub fn byte(&self) -> u8 {
                match self {
                    $(Opcode::$variant => $byte,)*
                    Opcode::Push(n) => 0x5f + (*n).min(32),
                    Opcode::Dup(n) => 0x7f + (*n).clamp(1, 16),
                    Opcode::Swap(n) => 0x8f + (*n).clamp(1, 16),
                    Opcode::Log(n) => 0xa0 + (*n).min(4),
                    Opcode::Unknown(byte) => *byte,
                }
            }

            fn simple_mnemonic(&self) -> Option<&'static str> {
                match self {
                    $(Opcode::$variant => Some($name),)*
                    _ => None,
                }
            }

            fn from_simple_mnemonic(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcode_table! {
    Stop = 0x00 => "STOP",
    Add = 0x01 => "ADD",
    Mul = 0x02 => "MUL",
    Sub = 0x03 => "SUB",
    Div = 0x04 => "DIV",
    Sdiv = 0x05 => "SDIV",
    Mod = 0x06 => "MOD",
    Smod = 0x07 => "SMOD",
    Addmod = 0x08 => "ADDMOD",
    Mulmod = 0x09 => "MULMOD",
    Exp = 0x0a => "EXP",
    Signextend = 0x0b => "SIGNEXTEND",
    Lt = 0x10 => "LT",
    Gt = 0x11 => "GT",
    Slt = 0x12 => "SLT",
    Sgt = 0x13 => "SGT",
    Eq = 0x14 => "EQ",
    Iszero = 0x15 => "ISZERO",
    And = 0x16 => "AND",
    Or = 0x17 => "OR",
    Xor = 0x18 => "XOR",
    Not = 0x19 => "NOT",
    Byte = 0x1a => "BYTE",
    Shl = 0x1b => "SHL",
    Shr = 0x1c => "SHR",
    Sar = 0x1d => "SAR",
    Sha3 = 0x20 => "SHA3",
    Address = 0x30 => "ADDRESS",
    Balance = 0x31 => "BALANCE",
    Origin = 0x32 => "ORIGIN",
    Caller = 0x33 => "CALLER",
    Callvalue = 0x34 => "CALLVALUE",
    Calldataload = 0x35 => "CALLDATALOAD",
    Calldatasize = 0x36 => "CALLDATASIZE",
    Calldatacopy = 0x37 => "CALLDATACOPY",
    Codesize = 0x38 => "CODESIZE",
    Codecopy = 0x39 => "CODECOPY",
    Gasprice = 0x3a => "GASPRICE",
    Extcodesize = 0x3b => "EXTCODESIZE",
    Extcodecopy = 0x3c => "EXTCODECOPY",
    Returndatasize = 0x3d => "RETURNDATASIZE",
    Returndatacopy = 0x3e => "RETURNDATACOPY",
    Extcodehash = 0x3f => "EXTCODEHASH",
    Blockhash = 0x40 => "BLOCKHASH",
    Coinbase = 0x41 => "COINBASE",
    Timestamp = 0x42 => "TIMESTAMP",
    Number = 0x43 => "NUMBER",
    Difficulty = 0x44 => "DIFFICULTY",
    Gaslimit = 0x45 => "GASLIMIT",
    Chainid = 0x46 => "CHAINID",
    Selfbalance = 0x47 => "SELFBALANCE",
    Basefee = 0x48 => "BASEFEE",
    Blobhash = 0x49 => "BLOBHASH",
    Blobbasefee = 0x4a => "BLOBBASEFEE",
    Pop = 0x50 => "POP",
    Mload = 0x51 => "MLOAD",
    Mstore = 0x52 => "MSTORE",
    Mstore8 = 0x53 => "MSTORE8",
    Sload = 0x54 => "SLOAD",
    Sstore = 0x55 => "SSTORE",
    Jump = 0x56 => "JUMP",
    Jumpi = 0x57 => "JUMPI",
    Pc = 0x58 => "PC",
    Msize = 0x59 => "MSIZE",
    Gas = 0x5a => "GAS",
    Jumpdest = 0x5b => "JUMPDEST",
    Tload = 0x5c => "TLOAD",
    Tstore = 0x5d => "TSTORE",
    Mcopy = 0x5e => "MCOPY",
    Create = 0xf0 => "CREATE",
    Call = 0xf1 => "CALL",
    Callcode = 0xf2 => "CALLCODE",
    Return = 0xf3 => "RETURN",
    Delegatecall = 0xf4 => "DELEGATECALL",
    Create2 = 0xf5 => "CREATE2",
    Staticcall = 0xfa => "STATICCALL",
    Revert = 0xfd => "REVERT",
    Invalid = 0xfe => "INVALID",
    Selfdestruct = 0xff => "SELFDESTRUCT",
}

/// Opcodes that open a new execution context
pub const CALL_LIKE_OPCODES: [Opcode; 6] = [
    Opcode::Call,
    Opcode::Callcode,
    Opcode::Staticcall,
    Opcode::Delegatecall,
    Opcode::Create,
    Opcode::Create2,
];

/// Opcodes that deploy a new program
pub const CREATE_OPCODES: [Opcode; 2] = [Opcode::Create, Opcode::Create2];

/// Opcodes that end the current execution context
pub const TERMINAL_OPCODES: [Opcode; 5] = [
    Opcode::Return,
    Opcode::Stop,
    Opcode::Revert,
    Opcode::Invalid,
    Opcode::Selfdestruct,
];

impl Opcode {
    /// Message-call or creation family
    pub fn is_call_like(&self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::Callcode
                | Opcode::Staticcall
                | Opcode::Delegatecall
                | Opcode::Create
                | Opcode::Create2
        )
    }

    pub fn is_create_like(&self) -> bool {
        matches!(self, Opcode::Create | Opcode::Create2)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::Stop | Opcode::Revert | Opcode::Invalid | Opcode::Selfdestruct
        )
    }

    /// CALL and CALLCODE carry a value word between address and input offset
    pub fn transfers_value(&self) -> bool {
        matches!(self, Opcode::Call | Opcode::Callcode)
    }

    /// Number of immediate operand bytes following the opcode byte
    pub fn push_size(&self) -> usize {
        match self {
            Opcode::Push(n) => usize::from(*n),
            _ => 0,
        }
    }

    /// Encoded length of the instruction including its operand
    pub fn insn_len(&self) -> usize {
        1 + self.push_size()
    }

    pub fn mnemonic(&self) -> String {
        self.to_string()
    }
}

/// Free-standing form of [`Opcode::is_call_like`]
pub fn is_call_like(op: Opcode) -> bool {
    op.is_call_like()
}

/// Free-standing form of [`Opcode::is_create_like`]
pub fn is_create_like(op: Opcode) -> bool {
    op.is_create_like()
}

/// Free-standing form of [`Opcode::is_terminal`]
pub fn is_terminal(op: Opcode) -> bool {
    op.is_terminal()
}

/// Encoded instruction length of a raw bytecode byte
pub fn insn_len(byte: u8) -> usize {
    Opcode::from_byte(byte).insn_len()
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.simple_mnemonic() {
            return f.write_str(name);
        }
        match self {
            Opcode::Push(n) => write!(f, "PUSH{}", n),
            Opcode::Dup(n) => write!(f, "DUP{}", n),
            Opcode::Swap(n) => write!(f, "SWAP{}", n),
            Opcode::Log(n) => write!(f, "LOG{}", n),
            _ => write!(f, "0x{:02x}", self.byte()),
        }
    }
}

/// Error for mnemonics outside the instruction set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown opcode mnemonic: {0}")]
pub struct UnknownMnemonic(pub String);

fn numbered(name: &str, prefix: &str, range: std::ops::RangeInclusive<u8>) -> Option<u8> {
    let n: u8 = name.strip_prefix(prefix)?.parse().ok()?;
    range.contains(&n).then_some(n)
}

fn parse_hex_byte(text: &str) -> Option<u8> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    u8::from_str_radix(digits, 16).ok()
}

impl FromStr for Opcode {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_uppercase();
        if let Some(op) = Opcode::from_simple_mnemonic(&name) {
            return Ok(op);
        }

        let op = match name.as_str() {
            "KECCAK256" => Some(Opcode::Sha3),
            "PREVRANDAO" | "RANDOM" => Some(Opcode::Difficulty),
            "SUICIDE" => Some(Opcode::Selfdestruct),
            _ => None,
        }
        .or_else(|| numbered(&name, "PUSH", 0..=32).map(Opcode::Push))
        .or_else(|| numbered(&name, "DUP", 1..=16).map(Opcode::Dup))
        .or_else(|| numbered(&name, "SWAP", 1..=16).map(Opcode::Swap))
        .or_else(|| numbered(&name, "LOG", 0..=4).map(Opcode::Log))
        // geth renders undefined bytes as "opcode 0xef not defined"
        .or_else(|| {
            let inner = name
                .strip_prefix("OPCODE ")
                .and_then(|rest| rest.strip_suffix(" NOT DEFINED"))
                .unwrap_or(&name);
            parse_hex_byte(inner).map(Opcode::from_byte)
        });

        op.ok_or_else(|| UnknownMnemonic(s.to_string()))
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
