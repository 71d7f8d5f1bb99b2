// SPDX-License-Identifier: AGPL-3.0

use crate::artifact::ContractArtifact;
use std::collections::HashMap;
use tracecov_contract::decode_bytecode;
use tracecov_exceptions::{CoverageResult, InvalidBytecodeFormatError, UnresolvedContractAddress};
use tracecov_logs::{warn_code, ErrorCode};
use tracecov_traces::Address;

/// Known artifacts plus the addresses identified as deployments of them
#[derive(Debug, Clone, Default)]
pub struct ArtifactLibrary {
    pub artifacts: Vec<ContractArtifact>,
    address_index: HashMap<Address, usize>,
}

impl ArtifactLibrary {
    pub fn new(artifacts: Vec<ContractArtifact>) -> Self {
        Self {
            artifacts,
            address_index: HashMap::new(),
        }
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.address_index.contains_key(address)
    }

    pub fn artifact_for(&self, address: &Address) -> Option<&ContractArtifact> {
        self.address_index
            .get(address)
            .map(|index| &self.artifacts[*index])
    }

    pub fn by_name(&self, name: &str) -> Option<&ContractArtifact> {
        self.artifacts.iter().find(|artifact| artifact.name == name)
    }

    /// Identifies the artifact deployed at `address` from its creation or
    /// runtime code and binds the address to it.
    ///
    /// Artifacts are tried in load order and the first match wins. An
    /// already bound address returns its artifact without re-matching. No
    /// match is not an error: the address stays unbound so a later attempt
    /// can still succeed.
    pub fn find_by_code_hash(
        &mut self,
        bytecode_hex: &str,
        address: Address,
    ) -> CoverageResult<Option<&ContractArtifact>> {
        if !bytecode_hex.starts_with("0x") {
            return Err(InvalidBytecodeFormatError::new(bytecode_hex).into());
        }
        if let Some(&index) = self.address_index.get(&address) {
            return Ok(Some(&self.artifacts[index]));
        }

        let code = decode_bytecode(bytecode_hex)?;
        let found = self
            .artifacts
            .iter()
            .position(|artifact| artifact.matches(bytecode_hex, &code));

        match found {
            Some(index) => {
                self.address_index.insert(address, index);
                Ok(Some(&self.artifacts[index]))
            }
            None => {
                let unresolved = UnresolvedContractAddress(address.to_string());
                warn_code(ErrorCode::UnresolvedContract, &unresolved.to_string(), false);
                Ok(None)
            }
        }
    }

    /// Bound addresses grouped per artifact, in artifact order
    pub fn addresses_by_artifact(&self) -> Vec<(usize, Vec<Address>)> {
        let mut grouped: Vec<Vec<Address>> = vec![Vec::new(); self.artifacts.len()];
        for (address, index) in &self.address_index {
            grouped[*index].push(*address);
        }
        grouped
            .into_iter()
            .enumerate()
            .filter(|(_, addresses)| !addresses.is_empty())
            .map(|(index, mut addresses)| {
                addresses.sort();
                (index, addresses)
            })
            .collect()
    }

    /// `address -> contract name` for rendering
    pub fn address_names(&self) -> HashMap<String, String> {
        self.address_index
            .iter()
            .map(|(address, index)| (address.to_string(), self.artifacts[*index].name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
