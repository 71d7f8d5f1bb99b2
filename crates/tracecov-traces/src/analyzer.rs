// SPDX-License-Identifier: AGPL-3.0

use crate::{ContextAddress, ExecutionStep, FunctionId, Word};
use tracecov_exceptions::NotCallLikeError;
use tracecov_logs::{debug_code, ErrorCode};

/// Callee of a call-like step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTarget {
    pub address: ContextAddress,
    pub function_id: FunctionId,
}

impl CallTarget {
    fn unknown() -> Self {
        Self {
            address: ContextAddress::Unknown,
            function_id: FunctionId::Unknown,
        }
    }
}

/// Stack operands of a message call, top of stack first
struct CallOperands<'a> {
    address: &'a Word,
    in_offset: &'a Word,
    in_size: &'a Word,
}

fn call_operands<'a>(step: &'a ExecutionStep, stack: &'a [Word]) -> Option<CallOperands<'a>> {
    let mut reversed = stack.iter().rev();
    let _gas = reversed.next()?;
    let address = reversed.next()?;
    if step.op.transfers_value() {
        let _value = reversed.next()?;
    }
    Some(CallOperands {
        address,
        in_offset: reversed.next()?,
        in_size: reversed.next()?,
    })
}

/// Reads `len` bytes at `offset` from a word-chunked memory snapshot
fn read_memory(memory: &[Word], offset: usize, len: usize) -> Option<Vec<u8>> {
    let end = offset.checked_add(len)?;
    if end > memory.len() * 32 {
        return None;
    }
    Some((offset..end).map(|i| memory[i / 32].0[i % 32]).collect())
}

/// Extracts the callee address and function selector of one call-like step.
///
/// Creations return a pending address: the new contract's address only shows
/// up on the caller's stack once the constructor returns. Missing stack or
/// memory snapshots degrade to [`ContextAddress::Unknown`] /
/// [`FunctionId::Unknown`] instead of failing.
pub fn analyze_call_target(step: &ExecutionStep) -> Result<CallTarget, NotCallLikeError> {
    if !step.op.is_call_like() {
        return Err(NotCallLikeError(step.op.to_string()));
    }

    if step.op.is_create_like() {
        return Ok(CallTarget {
            address: ContextAddress::Pending,
            function_id: FunctionId::Create,
        });
    }

    let Some(stack) = step.stack.as_deref() else {
        return Ok(CallTarget::unknown());
    };
    let Some(operands) = call_operands(step, stack) else {
        debug_code(
            ErrorCode::DegradedCallTarget,
            &format!("{} at pc {} has a short stack", step.op, step.pc),
            true,
        );
        return Ok(CallTarget::unknown());
    };

    let address = ContextAddress::Resolved(operands.address.to_address());
    let Some(memory) = step.memory.as_deref() else {
        return Ok(CallTarget {
            address,
            function_id: FunctionId::Unknown,
        });
    };

    let function_id = match (operands.in_offset.as_usize(), operands.in_size.as_usize()) {
        (Some(_), Some(size)) if size < 4 => FunctionId::Fallback,
        (Some(offset), Some(_)) => match read_memory(memory, offset, 4) {
            Some(bytes) => {
                let mut selector = [0u8; 4];
                selector.copy_from_slice(&bytes);
                FunctionId::Selector(selector)
            }
            None => FunctionId::Unknown,
        },
        _ => FunctionId::Unknown,
    };

    if function_id.is_unknown() {
        debug_code(
            ErrorCode::DegradedCallTarget,
            &format!(
                "{} at pc {}: input region outside captured memory",
                step.op, step.pc
            ),
            true,
        );
    }

    Ok(CallTarget {
        address,
        function_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    fn words(items: &[&str]) -> Vec<Word> {
        items.iter().map(|w| w.parse().unwrap()).collect()
    }

    fn call_memory() -> Vec<Word> {
        words(&[
            "0000000000000000000000000000000000000000000000000000000075278362",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000000000000000000000000000000",
        ])
    }

    #[test]
    fn test_call_target() {
        // bottom-first: inSize, inOffset, value, address, gas
        let step = ExecutionStep::new(1, Opcode::Call, 120)
            .with_stack(words(&[
                "0x24",
                "0x1c",
                "0x0",
                "0x000000000000000000000000345ca3e014aaf5dca488057592ee47305d9b3e10",
                "0x2dc6c0",
            ]))
            .with_memory(call_memory());

        let target = analyze_call_target(&step).unwrap();
        assert_eq!(
            target.address.to_string(),
            "0x345ca3e014aaf5dca488057592ee47305d9b3e10"
        );
        assert_eq!(
            target.function_id,
            FunctionId::Selector([0x75, 0x27, 0x83, 0x62])
        );
    }

    #[test]
    fn test_staticcall_has_no_value_operand() {
        let step = ExecutionStep::new(1, Opcode::Staticcall, 88)
            .with_stack(words(&[
                "0x4",
                "0x1c",
                "0x000000000000000000000000345ca3e014aaf5dca488057592ee47305d9b3e10",
                "0x2dc6c0",
            ]))
            .with_memory(words(&[
                "000000000000000000000000000000000000000000000000000000006d4ce63c",
            ]));

        let target = analyze_call_target(&step).unwrap();
        assert_eq!(
            target.function_id,
            FunctionId::Selector([0x6d, 0x4c, 0xe6, 0x3c])
        );
    }

    #[test]
    fn test_delegatecall_matches_staticcall_layout() {
        let step = ExecutionStep::new(1, Opcode::Delegatecall, 0)
            .with_stack(words(&["0x24", "0x1c", "0x01", "0x5"]))
            .with_memory(call_memory());
        let target = analyze_call_target(&step).unwrap();
        assert_eq!(
            target.address.to_string(),
            "0x0000000000000000000000000000000000000001"
        );
        assert_eq!(
            target.function_id,
            FunctionId::Selector([0x75, 0x27, 0x83, 0x62])
        );
    }

    #[test]
    fn test_not_call_like() {
        let step = ExecutionStep::new(1, Opcode::Push(1), 0);
        let err = analyze_call_target(&step).unwrap_err();
        assert_eq!(err.0, "PUSH1");
    }

    #[test]
    fn test_create_is_pending() {
        for op in [Opcode::Create, Opcode::Create2] {
            let target = analyze_call_target(&ExecutionStep::new(1, op, 0)).unwrap();
            assert_eq!(target.address, ContextAddress::Pending);
            assert_eq!(target.function_id, FunctionId::Create);
        }
    }

    #[test]
    fn test_degraded_snapshots() {
        let no_stack = ExecutionStep::new(1, Opcode::Call, 0);
        assert_eq!(analyze_call_target(&no_stack).unwrap(), CallTarget::unknown());

        let no_memory = ExecutionStep::new(1, Opcode::Call, 0)
            .with_stack(words(&["0x24", "0x1c", "0x0", "0xbeef", "0x1"]));
        let target = analyze_call_target(&no_memory).unwrap();
        assert!(target.address.resolved().is_some());
        assert_eq!(target.function_id, FunctionId::Unknown);

        let short_stack = ExecutionStep::new(1, Opcode::Call, 0).with_stack(words(&["0x1"]));
        assert_eq!(
            analyze_call_target(&short_stack).unwrap(),
            CallTarget::unknown()
        );
    }

    #[test]
    fn test_input_outside_memory_is_unknown() {
        let step = ExecutionStep::new(1, Opcode::Call, 0)
            .with_stack(words(&["0x24", "0x200", "0x0", "0xbeef", "0x1"]))
            .with_memory(call_memory());
        let target = analyze_call_target(&step).unwrap();
        assert_eq!(target.function_id, FunctionId::Unknown);
    }

    #[test]
    fn test_short_input_is_fallback() {
        let step = ExecutionStep::new(1, Opcode::Call, 0)
            .with_stack(words(&["0x0", "0x0", "0x64", "0xbeef", "0x1"]))
            .with_memory(vec![]);
        let target = analyze_call_target(&step).unwrap();
        assert_eq!(target.function_id, FunctionId::Fallback);
    }
}
