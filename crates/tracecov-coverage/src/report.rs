// SPDX-License-Identifier: AGPL-3.0

use crate::accumulator::CoverageAccumulator;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracecov_build::{ArtifactLibrary, ContractArtifact};
use tracecov_contract::{
    count_used, coverage_percent, match_called_functions, match_used_opcodes_detailed,
    Instruction,
};
use tracecov_exceptions::CoverageResult;
use tracecov_logs::{warn_code, ErrorCode};
use tracecov_mapper::{line_hits, parse, pos_to_line_convert_map, render_lcov};
use tracecov_traces::{Address, ContextKind, StepRecord};

/// Instruction coverage of one code object
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CodeCoverage {
    pub used: usize,
    pub total: usize,
    pub percent: f64,
}

impl CodeCoverage {
    fn new(used: usize, total: usize) -> Self {
        Self {
            used,
            total,
            percent: coverage_percent(used, total),
        }
    }
}

/// Declared functions invoked at least once
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MethodCoverage {
    pub called: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactCoverage {
    pub name: String,
    pub addresses: Vec<Address>,
    pub runtime: CodeCoverage,
    pub creation: CodeCoverage,
    pub methods: MethodCoverage,
    pub function_calls: IndexMap<String, usize>,
    /// Executed program counters with no instruction in the disassembly
    pub unknown_program_counters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// 1-based line -> hit count, from the runtime source map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lines: Option<BTreeMap<usize, usize>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageReport {
    pub artifacts: Vec<ArtifactCoverage>,
}

impl CoverageReport {
    /// LCOV records of every artifact with source line data
    pub fn to_lcov(&self) -> String {
        self.artifacts
            .iter()
            .filter_map(|artifact| {
                let lines = artifact.source_lines.as_ref()?;
                let path = artifact.source_path.as_deref().unwrap_or(&artifact.name);
                Some(render_lcov(path, lines))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Instruction cap handed to the disassembler: solc code has its metadata
/// trailer stripped instead
fn byte_length(artifact: &ContractArtifact, hexcode: &str) -> Option<usize> {
    if artifact.is_solc() {
        None
    } else {
        Some(hexcode.len().saturating_sub(2) / 2)
    }
}

fn code_coverage(
    label: &str,
    artifact: &ContractArtifact,
    hexcode: &str,
    steps: &[StepRecord],
) -> CoverageResult<(Vec<Instruction>, CodeCoverage, usize)> {
    let outcome =
        match_used_opcodes_detailed(label, hexcode, steps, byte_length(artifact, hexcode))?;
    let coverage = CodeCoverage::new(count_used(&outcome.instructions), outcome.instructions.len());
    Ok((outcome.instructions, coverage, outcome.unknown.len()))
}

fn source_lines(
    artifact: &ContractArtifact,
    runtime: &[Instruction],
) -> Option<BTreeMap<usize, usize>> {
    let source_map = artifact.deployed_source_map.as_deref()?;
    let source = artifact.source.as_deref()?;
    let entries = match parse(source_map) {
        Ok(entries) => entries,
        Err(e) => {
            warn_code(
                ErrorCode::InvalidSourceMap,
                &format!("{}: {}", artifact.name, e),
                false,
            );
            return None;
        }
    };
    let file_index = artifact
        .source_file_index
        .or_else(|| entries.iter().map(|e| e.file_index).find(|i| *i >= 0))?;
    let pos_map = pos_to_line_convert_map(source);
    Some(line_hits(runtime, &entries, &pos_map, file_index))
}

fn artifact_coverage(
    artifact: &ContractArtifact,
    addresses: &[Address],
    accumulator: &CoverageAccumulator,
) -> CoverageResult<ArtifactCoverage> {
    let runtime_steps = accumulator.steps_for(addresses, ContextKind::Function);
    let creation_steps = accumulator.steps_for(addresses, ContextKind::Create);

    let at: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    let at = at.join(", ");
    let (runtime_insns, runtime, runtime_unknown) = code_coverage(
        &format!("{} runtime at {}", artifact.name, at),
        artifact,
        &artifact.deployed_bytecode,
        &runtime_steps,
    )?;
    let (_, creation, creation_unknown) = code_coverage(
        &format!("{} creation at {}", artifact.name, at),
        artifact,
        &artifact.bytecode,
        &creation_steps,
    )?;

    let function_calls =
        match_called_functions(&artifact.functions, &accumulator.selectors_for(addresses));
    let called = function_calls.values().filter(|count| **count > 0).count();
    let total = function_calls.len();

    Ok(ArtifactCoverage {
        name: artifact.name.clone(),
        addresses: addresses.to_vec(),
        runtime,
        creation,
        methods: MethodCoverage {
            called,
            total,
            percent: coverage_percent(called, total),
        },
        function_calls,
        unknown_program_counters: runtime_unknown + creation_unknown,
        source_path: artifact.source_path.clone(),
        source_lines: source_lines(artifact, &runtime_insns),
    })
}

/// Per-artifact coverage of everything recorded so far.
///
/// Addresses bound to the same artifact are merged; artifacts without a bound
/// address are left out. Artifacts are matched in parallel and reported in
/// load order.
pub fn generate_report(
    library: &ArtifactLibrary,
    accumulator: &CoverageAccumulator,
) -> CoverageResult<CoverageReport> {
    let grouped = library.addresses_by_artifact();
    let artifacts = grouped
        .par_iter()
        .map(|(index, addresses)| {
            artifact_coverage(&library.artifacts[*index], addresses, accumulator)
        })
        .collect::<CoverageResult<Vec<_>>>()?;
    Ok(CoverageReport { artifacts })
}
