// SPDX-License-Identifier: AGPL-3.0

//! Truffle artifact model and ABI function tables

use crate::mask::MaskedBytecode;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracecov_hashes::function_selector;
use tracecov_logs::{debug, warn_code, ErrorCode};
use tracecov_traces::FunctionId;

/// Raw artifact as written by `truffle compile`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruffleArtifact {
    pub contract_name: String,
    #[serde(default)]
    pub abi: Vec<AbiItem>,
    #[serde(default)]
    pub bytecode: Option<String>,
    #[serde(default)]
    pub deployed_bytecode: Option<String>,
    #[serde(default)]
    pub source_map: Option<String>,
    #[serde(default)]
    pub deployed_source_map: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub compiler: Option<CompilerInfo>,
    #[serde(default)]
    pub ast: Option<AstRoot>,
}

/// Only the root `src` of the AST is read: its third field is the file
/// index this contract's source has in the compiler's source list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstRoot {
    #[serde(default)]
    pub src: Option<String>,
}

impl AstRoot {
    pub fn file_index(&self) -> Option<i64> {
        self.src.as_deref()?.split(':').nth(2)?.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// ABI entry; only what signature derivation needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiItem {
    #[serde(rename = "type", default = "default_abi_kind")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
}

fn default_abi_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub components: Option<Vec<AbiParam>>,
}

impl AbiParam {
    /// Canonical type, with tuples spelled out as `(t1,t2)`
    pub fn canonical_type(&self) -> String {
        match (self.kind.strip_prefix("tuple"), &self.components) {
            (Some(array_suffix), Some(components)) => {
                format!("({}){}", canonical_types(components), array_suffix)
            }
            _ => self.kind.clone(),
        }
    }
}

fn canonical_types(params: &[AbiParam]) -> String {
    params
        .iter()
        .map(AbiParam::canonical_type)
        .collect::<Vec<_>>()
        .join(",")
}

/// Canonical `name(type1,type2,...)` signature of an ABI entry
pub fn abi_signature(name: &str, inputs: &[AbiParam]) -> String {
    format!("{}({})", name, canonical_types(inputs))
}

/// Declared functions keyed by signature, constructor first.
///
/// The constructor maps to [`FunctionId::Create`] so it can never collide
/// with a real selector.
pub fn function_table(abi: &[AbiItem]) -> IndexMap<String, FunctionId> {
    let mut functions = IndexMap::new();

    let constructor_inputs = abi
        .iter()
        .find(|item| item.kind == "constructor")
        .map(|item| item.inputs.as_slice())
        .unwrap_or(&[]);
    functions.insert(
        abi_signature("constructor", constructor_inputs),
        FunctionId::Create,
    );

    for item in abi.iter().filter(|item| item.kind == "function") {
        let Some(name) = item.name.as_deref() else {
            continue;
        };
        let signature = abi_signature(name, &item.inputs);
        let selector = FunctionId::Selector(function_selector(&signature));
        functions.insert(signature, selector);
    }
    functions
}

/// A compiled program known to the session
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    /// Creation code, `0x`-prefixed
    pub bytecode: String,
    /// Runtime code, `0x`-prefixed
    pub deployed_bytecode: String,
    pub compiler_name: String,
    pub functions: IndexMap<String, FunctionId>,
    pub source_map: Option<String>,
    pub deployed_source_map: Option<String>,
    pub source: Option<String>,
    pub source_path: Option<String>,
    /// Index of `source` in the source map's file list
    pub source_file_index: Option<i64>,
    pub artifact_path: PathBuf,
    pub(crate) creation_mask: Option<MaskedBytecode>,
    pub(crate) runtime_mask: Option<MaskedBytecode>,
}

fn has_code(hexcode: &str) -> bool {
    hexcode.len() > 2
}

impl ContractArtifact {
    /// Builds an artifact from a parsed Truffle JSON file.
    ///
    /// Returns `None` for entries without bytecode (interfaces, abstract
    /// contracts).
    pub fn from_truffle(raw: TruffleArtifact, artifact_path: &Path) -> Result<Option<Self>> {
        let Some(bytecode) = raw.bytecode.filter(|code| !code.is_empty()) else {
            return Ok(None);
        };
        let deployed_bytecode = raw.deployed_bytecode.unwrap_or_else(|| "0x".to_string());
        let compiler_name = raw
            .compiler
            .map(|compiler| compiler.name)
            .unwrap_or_default();
        let solc = compiler_name == "solc";

        let creation_mask = if has_code(&bytecode) {
            Some(MaskedBytecode::build(&bytecode, solc).with_context(|| {
                format!("{}: malformed bytecode", artifact_path.display())
            })?)
        } else {
            None
        };
        let runtime_mask = if has_code(&deployed_bytecode) {
            Some(
                MaskedBytecode::build(&deployed_bytecode, solc).with_context(|| {
                    format!("{}: malformed deployedBytecode", artifact_path.display())
                })?,
            )
        } else {
            None
        };

        let source = match (raw.source, &raw.source_path) {
            (Some(source), _) => Some(source),
            (None, Some(path)) => match std::fs::read_to_string(path) {
                Ok(text) => Some(text),
                Err(e) => {
                    debug(&format!("cannot read source {}: {}", path, e), false);
                    None
                }
            },
            (None, None) => None,
        };

        Ok(Some(Self {
            name: raw.contract_name,
            functions: function_table(&raw.abi),
            bytecode,
            deployed_bytecode,
            compiler_name,
            source_map: raw.source_map,
            deployed_source_map: raw.deployed_source_map,
            source,
            source_path: raw.source_path,
            source_file_index: raw.ast.as_ref().and_then(AstRoot::file_index),
            artifact_path: artifact_path.to_path_buf(),
            creation_mask,
            runtime_mask,
        }))
    }

    /// Parses one artifact file; files without bytecode are skipped with a warning
    pub fn from_file(path: &Path) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        let raw: TruffleArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build artifact: {:?}", path))?;

        let artifact = Self::from_truffle(raw, path)?;
        if artifact.is_none() {
            warn_code(
                ErrorCode::ArtifactSkipped,
                &format!("{} doesn't contain bytecode. Skipping...", path.display()),
                false,
            );
        }
        Ok(artifact)
    }

    pub fn is_solc(&self) -> bool {
        self.compiler_name == "solc"
    }

    /// Both creation and runtime code are present
    pub fn is_identifiable(&self) -> bool {
        has_code(&self.bytecode) && has_code(&self.deployed_bytecode)
    }

    /// Raw (case-insensitive) or masked match against creation or runtime code
    pub fn matches(&self, hexcode: &str, code: &[u8]) -> bool {
        if !self.is_identifiable() {
            return false;
        }
        if hexcode.eq_ignore_ascii_case(&self.bytecode)
            || hexcode.eq_ignore_ascii_case(&self.deployed_bytecode)
        {
            return true;
        }
        [&self.creation_mask, &self.runtime_mask]
            .into_iter()
            .flatten()
            .any(|mask| mask.matches_prefix(code))
    }
}
