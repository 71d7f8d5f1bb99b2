// SPDX-License-Identifier: AGPL-3.0

//! Keccak hashing and ABI selector derivation

use sha3::{Digest, Keccak256};

/// Compute Keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute function selector (first 4 bytes of keccak256)
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// Selector rendered the way debuggers and ABI tooling print it (`0x` + 8 hex chars)
pub fn selector_hex(selector: &[u8; 4]) -> String {
    format!("0x{}", hex::encode(selector))
}
