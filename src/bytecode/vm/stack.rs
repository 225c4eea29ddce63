//! Stack operations for the bytecode VM.
//!
//! This module contains the operand stack primitives and the
//! push/pop/dup/swap/const instructions built on them.

use tracing::trace;

use super::env::Env;
use super::types::{Operand, Step, VmError, VmResult};
use crate::models::Value;

impl Env {
    // === Stack Operations ===

    #[inline]
    pub(super) fn push(&mut self, operand: Operand) {
        self.stack.push(operand);
    }

    #[inline]
    pub(super) fn push_value(&mut self, value: Value) {
        self.stack.push(Operand::Value(value));
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Operand> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn pop_value(&mut self) -> VmResult<Value> {
        self.pop()?.into_value()
    }

    #[inline]
    pub(super) fn peek(&self) -> VmResult<&Operand> {
        self.stack.top().ok_or(VmError::StackUnderflow)
    }

    pub(super) fn op_pop(&mut self) -> VmResult<Step> {
        self.pop()?;
        Ok(Step::Next)
    }

    pub(super) fn op_dup(&mut self) -> VmResult<Step> {
        trace!(target: "filtervm::vm::stack", pc = self.pc, "dup");
        let operand = self.peek()?.clone();
        self.push(operand);
        Ok(Step::Next)
    }

    pub(super) fn op_swap(&mut self) -> VmResult<Step> {
        trace!(target: "filtervm::vm::stack", pc = self.pc, "swap");
        let x = self.pop()?;
        let y = self.pop()?;
        self.push(x);
        self.push(y);
        Ok(Step::Next)
    }

    /// Replace the top of stack
    pub(super) fn op_const(&mut self, value: &Value) -> VmResult<Step> {
        self.pop()?;
        self.push_value(value.clone());
        Ok(Step::Next)
    }
}
