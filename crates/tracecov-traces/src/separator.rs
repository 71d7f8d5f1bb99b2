// SPDX-License-Identifier: AGPL-3.0

use crate::{analyze_call_target, CallContext, CallTree, ContextAddress, ContextKind};
use crate::{ExecutionStep, FunctionId, Opcode};
use tracecov_exceptions::{CoverageResult, UnbalancedTraceError};
use tracecov_logs::{debug_code, ErrorCode};

struct Separator {
    contexts: Vec<CallContext>,
    call_stack: Vec<usize>,
    current: usize,
    /// Open contexts still waiting for their selector to show up via CALLDATALOAD
    searching_selector: Vec<usize>,
}

impl Separator {
    fn new() -> Self {
        Self {
            contexts: vec![CallContext::base()],
            call_stack: Vec::new(),
            current: 0,
            searching_selector: Vec::new(),
        }
    }

    fn recover_selector(&mut self, step: &ExecutionStep, next: Option<&ExecutionStep>) {
        if !self.searching_selector.contains(&self.current) {
            return;
        }
        // only a load of the first calldata word carries the selector
        if step.top_of_stack().is_some_and(|offset| !offset.is_zero()) {
            return;
        }
        if let Some(word) = next.and_then(ExecutionStep::top_of_stack) {
            self.contexts[self.current].function_id =
                FunctionId::Selector(word.leading_selector());
            self.stop_searching(self.current);
        }
    }

    fn stop_searching(&mut self, context: usize) {
        self.searching_selector.retain(|c| *c != context);
    }

    fn open(&mut self, step: &ExecutionStep) -> CoverageResult<()> {
        let target = analyze_call_target(step)?;
        let kind = if step.op.is_create_like() {
            ContextKind::Create
        } else {
            ContextKind::Function
        };

        self.call_stack.push(self.current);
        self.contexts
            .push(CallContext::child(target, kind, self.current));
        self.current = self.contexts.len() - 1;

        if target.function_id.is_unknown() {
            self.searching_selector.push(self.current);
        }
        Ok(())
    }

    fn close(&mut self, frames: usize, step: &ExecutionStep, next: Option<&ExecutionStep>) {
        for popped in 0..frames {
            let ending = self.current;
            let context = &mut self.contexts[ending];

            // a successful constructor leaves the new address on the caller's stack
            if popped == 0 && context.kind == ContextKind::Create {
                if let Some(word) = next.and_then(ExecutionStep::top_of_stack) {
                    if !word.is_zero() {
                        context.address = ContextAddress::Resolved(word.to_address());
                    }
                }
            }

            match self.call_stack.pop() {
                Some(parent) => {
                    self.stop_searching(ending);
                    self.current = parent;
                }
                None => {
                    if next.is_some() {
                        debug_code(
                            ErrorCode::UnexpectedTermination,
                            &format!("{} at pc {} with no open call frame", step.op, step.pc),
                            true,
                        );
                    }
                    return;
                }
            }
        }
    }

    fn step(&mut self, step: &ExecutionStep, next: Option<&ExecutionStep>) -> CoverageResult<()> {
        self.contexts[self.current].steps.push(step.record());

        if step.op == Opcode::Calldataload {
            self.recover_selector(step, next);
        }

        let depth_drop = next.map_or(0, |n| step.depth.saturating_sub(n.depth));
        // value transfers and precompiles never enter a new frame
        if step.op.is_call_like() && next.is_some_and(|n| n.depth > step.depth) {
            self.open(step)?;
        } else if step.op.is_terminal() {
            self.close(depth_drop.max(1), step, next);
        } else if depth_drop > 0 {
            debug_code(
                ErrorCode::UnexpectedTermination,
                &format!(
                    "frame halted exceptionally at {} (pc {}, depth {})",
                    step.op, step.pc, step.depth
                ),
                true,
            );
            self.close(depth_drop, step, next);
        }
        Ok(())
    }

    fn finish(self) -> CoverageResult<CallTree> {
        if !self.call_stack.is_empty() {
            return Err(UnbalancedTraceError {
                open_frames: self.call_stack.len(),
            }
            .into());
        }
        Ok(CallTree {
            contexts: self.contexts,
        })
    }
}

/// Splits a flat debugger trace into the call contexts that produced it.
///
/// Every input step lands in exactly one context. A call-like step opens a
/// child context only when the next step runs one level deeper; a terminal
/// step (or an exceptional halt, seen as a depth drop) closes the current
/// one. Frames still open after the last step make the trace unbalanced.
pub fn separate_trace(trace: &[ExecutionStep]) -> CoverageResult<CallTree> {
    let mut separator = Separator::new();
    for (i, step) in trace.iter().enumerate() {
        separator.step(step, trace.get(i + 1))?;
    }
    separator.finish()
}
