// SPDX-License-Identifier: AGPL-3.0

//! Bytecode masks for identifying deployed code
//!
//! Some regions of compiled code differ between otherwise identical builds:
//! library addresses filled in by the linker, the address a library stores
//! about itself, and the compiler's metadata hash. A mask keeps the stable
//! bytes and turns those regions into fixed-width wildcards.

use tracecov_contract::{decode_segments, metadata_len, CodeSegment};
use tracecov_exceptions::CoverageResult;

/// Legacy solc swarm trailer: `a1 65 'bzzr0' 58 20 <32 bytes> 00 29`
const LEGACY_METADATA_LEN: usize = 43;

const PUSH20: u8 = 0x73;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSegment {
    Fixed(Vec<u8>),
    Wildcard(usize),
}

impl MaskSegment {
    fn len(&self) -> usize {
        match self {
            MaskSegment::Fixed(bytes) => bytes.len(),
            MaskSegment::Wildcard(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaskedBytecode {
    segments: Vec<MaskSegment>,
}

impl MaskedBytecode {
    /// Masks `0x`-prefixed bytecode. `strip_metadata` drops the solc trailer.
    pub fn build(hexcode: &str, strip_metadata: bool) -> CoverageResult<Self> {
        let mut segments: Vec<MaskSegment> = decode_segments(hexcode)?
            .into_iter()
            .map(|segment| match segment {
                CodeSegment::Bytes(bytes) => MaskSegment::Fixed(bytes),
                CodeSegment::Placeholder => MaskSegment::Wildcard(20),
            })
            .collect();

        mask_self_address(&mut segments);

        let mut masked = Self { segments };
        if strip_metadata {
            let trailer = match masked.segments.last() {
                Some(MaskSegment::Fixed(tail)) => {
                    metadata_len(tail).unwrap_or(LEGACY_METADATA_LEN)
                }
                _ => LEGACY_METADATA_LEN,
            };
            masked.truncate_tail(trailer);
        }
        Ok(masked)
    }

    pub fn segments(&self) -> &[MaskSegment] {
        &self.segments
    }

    /// Byte length the mask covers
    pub fn len(&self) -> usize {
        self.segments.iter().map(MaskSegment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn truncate_tail(&mut self, mut excess: usize) {
        while excess > 0 {
            let Some(last) = self.segments.last_mut() else {
                return;
            };
            let len = last.len();
            if len <= excess {
                excess -= len;
                self.segments.pop();
                continue;
            }
            match last {
                MaskSegment::Fixed(bytes) => bytes.truncate(len - excess),
                MaskSegment::Wildcard(n) => *n -= excess,
            }
            excess = 0;
        }
    }

    /// True when `code` starts with the masked bytes. An empty mask matches nothing.
    pub fn matches_prefix(&self, code: &[u8]) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut pos = 0;
        for segment in &self.segments {
            let end = pos + segment.len();
            if end > code.len() {
                return false;
            }
            if let MaskSegment::Fixed(bytes) = segment {
                if code[pos..end] != bytes[..] {
                    return false;
                }
            }
            pos = end;
        }
        true
    }
}

/// Libraries begin with `PUSH20 <own address>`, zeroed at compile time
fn mask_self_address(segments: &mut Vec<MaskSegment>) {
    let Some(MaskSegment::Fixed(head)) = segments.first() else {
        return;
    };
    if head.len() < 21 || head[0] != PUSH20 || head[1..21].iter().any(|b| *b != 0) {
        return;
    }
    let rest = head[21..].to_vec();
    let mut replacement = vec![MaskSegment::Fixed(vec![PUSH20]), MaskSegment::Wildcard(20)];
    if !rest.is_empty() {
        replacement.push(MaskSegment::Fixed(rest));
    }
    segments.splice(0..1, replacement);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(n: usize) -> String {
        "00".repeat(n)
    }

    #[test]
    fn test_plain_code_is_one_fixed_segment() {
        let mask = MaskedBytecode::build("0x6001600201", false).unwrap();
        assert_eq!(
            mask.segments(),
            &[MaskSegment::Fixed(vec![0x60, 0x01, 0x60, 0x02, 0x01])]
        );
        assert!(mask.matches_prefix(&[0x60, 0x01, 0x60, 0x02, 0x01]));
        assert!(mask.matches_prefix(&[0x60, 0x01, 0x60, 0x02, 0x01, 0xff]));
        assert!(!mask.matches_prefix(&[0x60, 0x01, 0x60, 0x02]));
    }

    #[test]
    fn test_self_address_is_wildcard() {
        let hexcode = format!("0x73{}3014", zeros(20));
        let mask = MaskedBytecode::build(&hexcode, false).unwrap();
        assert_eq!(
            mask.segments(),
            &[
                MaskSegment::Fixed(vec![PUSH20]),
                MaskSegment::Wildcard(20),
                MaskSegment::Fixed(vec![0x30, 0x14]),
            ]
        );

        let mut deployed = vec![PUSH20];
        deployed.extend([0xabu8; 20]);
        deployed.extend([0x30, 0x14]);
        assert!(mask.matches_prefix(&deployed));
    }

    #[test]
    fn test_placeholder_is_wildcard() {
        let hexcode = format!("0x6073{}5b", format!("__$abc{}$__", "0".repeat(31)));
        let mask = MaskedBytecode::build(&hexcode, false).unwrap();
        assert_eq!(mask.len(), 2 + 20 + 1);

        let mut linked = vec![0x60, 0x73];
        linked.extend([0x11u8; 20]);
        linked.push(0x5b);
        assert!(mask.matches_prefix(&linked));
        linked[22] = 0x00;
        assert!(!mask.matches_prefix(&linked));
    }

    #[test]
    fn test_solc_metadata_is_stripped() {
        // code + cbor map (a1 + 3 bytes) + 0x0004
        let mask = MaskedBytecode::build("0x6001a1aabbcc0004", true).unwrap();
        assert_eq!(mask.segments(), &[MaskSegment::Fixed(vec![0x60, 0x01])]);
        assert!(mask.matches_prefix(&[0x60, 0x01, 0xa1, 0x99, 0x99, 0x99, 0x00, 0x04]));
    }

    #[test]
    fn test_legacy_trailer_fallback() {
        let hexcode = format!("0x600160020160ff{}", "ee".repeat(43));
        let mask = MaskedBytecode::build(&hexcode, true).unwrap();
        assert_eq!(mask.len(), 7);
    }

    #[test]
    fn test_empty_mask_matches_nothing() {
        let mask = MaskedBytecode::build("0x6001", true).unwrap();
        assert!(mask.is_empty());
        assert!(!mask.matches_prefix(&[0x60, 0x01]));
    }
}
