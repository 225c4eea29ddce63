//! Control flow operations for the bytecode VM.
//!
//! This module contains jumps, static and closure calls, scope entry and
//! return, plus the register instructions that resolve addresses through the
//! scope chain.

use std::sync::Arc;

use tracing::trace;

use super::env::Env;
use super::types::{CallSite, Closure, Operand, Step, VmError, VmResult};
use crate::bytecode::opcodes::{ScopeId, ScopedSlot};
use crate::models::Value;

impl Env {
    // === Jump Operations ===

    /// Pop; jump when the value is null or false
    pub(super) fn op_jump_if_not(&mut self, target: usize) -> VmResult<Step> {
        let cond = self.pop_value()?;
        if cond.is_truthy() {
            Ok(Step::Next)
        } else {
            Ok(Step::Jump(target))
        }
    }

    // === Calls ===

    pub(super) fn op_call(&mut self, target: usize) -> VmResult<Step> {
        self.call_site = Some(CallSite {
            return_pc: self.pc,
            caller: self.scopes.cursor(),
        });
        Ok(Step::Jump(target))
    }

    /// Capture the entry pc with the current scope chain
    pub(super) fn op_push_pc(&mut self, target: usize) -> VmResult<Step> {
        let closure = Closure {
            pc: target,
            scope: self.scopes.cursor(),
        };
        self.push(Operand::Closure(closure));
        Ok(Step::Next)
    }

    pub(super) fn op_call_pc(&mut self) -> VmResult<Step> {
        let closure = match self.pop()? {
            Operand::Closure(closure) => closure,
            other => {
                return Err(VmError::InvalidOperand {
                    expected: "closure",
                    got: other.kind_name(),
                })
            }
        };
        self.call_site = Some(CallSite {
            return_pc: self.pc,
            caller: closure.scope,
        });
        Ok(Step::Jump(closure.pc))
    }

    // === Scopes ===

    /// Enter a scope needing `slots` registers
    ///
    /// Without a pending call site this is the program's entry scope: it
    /// returns past the end of the program.
    pub(super) fn op_scope(&mut self, id: ScopeId, slots: usize, program_len: usize) -> VmResult<Step> {
        let site = self.call_site.take().unwrap_or(CallSite {
            return_pc: program_len,
            caller: self.scopes.cursor(),
        });
        let scope = self.scopes.enter(id, self.offset, site);
        self.offset += slots;
        if self.offset > self.registers.len() {
            self.registers.resize(self.offset * 2, Operand::default());
        }
        trace!(
            target: "filtervm::vm::scope",
            pc = self.pc,
            scope = id.0,
            offset = scope.offset,
            return_pc = scope.return_pc,
            "enter scope"
        );
        Ok(Step::Next)
    }

    /// Leave the innermost scope
    ///
    /// Leaving the last scope completes a result: the top of stack is
    /// yielded and pc stays on this instruction, so the next pull resumes
    /// here in backtrack mode and moves on to the pending forks.
    pub(super) fn op_ret(&mut self) -> VmResult<Step> {
        if self.backtrack || self.error.is_some() {
            return Ok(Step::Stop);
        }
        let scope = self.scopes.pop().ok_or(VmError::StackUnderflow)?;
        self.scopes.set_cursor(scope.saved);
        if self.scopes.is_empty() {
            let value = self.pop_value()?;
            trace!(target: "filtervm::vm::scope", pc = self.pc, "result");
            return Ok(Step::Yield(value));
        }
        Ok(Step::Jump(scope.return_pc + 1))
    }

    // === Registers ===

    fn register_index(&self, addr: ScopedSlot) -> VmResult<usize> {
        let scope = self
            .scopes
            .lookup(addr.scope)
            .ok_or(VmError::UnknownScope(addr.scope))?;
        let index = scope.offset + addr.slot;
        if index >= self.registers.len() {
            return Err(VmError::RegisterOutOfBounds(index));
        }
        Ok(index)
    }

    pub(super) fn op_load(&mut self, addr: ScopedSlot) -> VmResult<Step> {
        let index = self.register_index(addr)?;
        let operand = self.registers[index].clone();
        self.push(operand);
        Ok(Step::Next)
    }

    pub(super) fn op_store(&mut self, addr: ScopedSlot) -> VmResult<Step> {
        let index = self.register_index(addr)?;
        self.registers[index] = self.pop()?;
        Ok(Step::Next)
    }

    /// Pop a value onto the array accumulator in a register
    pub(super) fn op_append(&mut self, addr: ScopedSlot) -> VmResult<Step> {
        let index = self.register_index(addr)?;
        let value = self.pop_value()?;
        match &mut self.registers[index] {
            Operand::Value(Value::Array(items)) => {
                Arc::make_mut(items).push(value);
                Ok(Step::Next)
            }
            Operand::Value(other) => Err(VmError::InvalidOperand {
                expected: "array",
                got: other.type_name(),
            }),
            other => Err(VmError::InvalidOperand {
                expected: "array",
                got: other.kind_name(),
            }),
        }
    }

    // === Value Construction ===

    /// Build an object from `pairs` key/value pairs, keys pushed first
    ///
    /// Pairs are inserted in push order, so the last duplicate key wins.
    pub(super) fn op_object(&mut self, pairs: usize) -> VmResult<Step> {
        let mut entries = Vec::with_capacity(pairs);
        for _ in 0..pairs {
            let value = self.pop_value()?;
            let key = self.pop_value()?;
            match key {
                Value::String(key) => entries.push((key, value)),
                key => return Err(VmError::ObjectKeyNotString { key }),
            }
        }
        self.push_value(Value::object(entries.into_iter().rev()));
        Ok(Step::Next)
    }
}
