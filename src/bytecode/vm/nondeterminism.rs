//! Nondeterminism operations for the bytecode VM.
//!
//! Every branch point records a [`Fork`] holding checkpoints of the three
//! stacks. When the current continuation stops, the most recent fork is
//! popped, its checkpoints restored, and its instruction runs again in
//! backtrack mode to pick the alternative.

use std::sync::Arc;

use tracing::{debug, trace};

use super::env::Env;
use super::types::{Entries, Fork, Operand, PathEntry, Step, VmError, VmResult};
use crate::bytecode::opcodes::Opcode;
use crate::models::Value;

impl Env {
    // === Fork Bookkeeping ===

    pub(super) fn push_fork(&mut self, op: Opcode) {
        let fork = Fork {
            pc: self.pc,
            op,
            stack: self.stack.checkpoint(),
            scopes: self.scopes.checkpoint(),
            paths: self.paths.checkpoint(),
            path_depth: self.path_depth,
        };
        self.forks.push(fork);
        trace!(target: "filtervm::vm::nondet", pc = self.pc, %op, forks = self.forks.len(), "push fork");
    }

    /// Rewind to the most recent fork; false when none is left
    pub(super) fn pop_fork(&mut self) -> bool {
        let Some(fork) = self.forks.pop() else {
            return false;
        };
        self.stack.restore(fork.stack);
        self.scopes.restore(fork.scopes);
        self.paths.restore(fork.paths);
        self.path_depth = fork.path_depth;
        self.call_site = None;
        self.pc = fork.pc;
        self.backtrack = true;
        trace!(target: "filtervm::vm::nondet", pc = fork.pc, op = %fork.op, forks = self.forks.len(), "pop fork");
        true
    }

    // === Branch Points ===

    pub(super) fn op_fork(&mut self, target: usize) -> VmResult<Step> {
        if !self.backtrack {
            self.push_fork(Opcode::Fork);
            return Ok(Step::Next);
        }
        if self.error.is_some() {
            return Ok(Step::Stop);
        }
        self.backtrack = false;
        Ok(Step::Jump(target))
    }

    /// Fork whose alternative only runs to recover from an error
    pub(super) fn op_fork_opt(&mut self, target: usize) -> VmResult<Step> {
        if !self.backtrack {
            self.push_fork(Opcode::ForkOpt);
            return Ok(Step::Next);
        }
        match self.error.take() {
            Some(err) if err.is_catchable() => {
                trace!(target: "filtervm::vm::nondet", pc = self.pc, error = %err, "caught");
                self.push_value(err.catch_value());
                self.backtrack = false;
                Ok(Step::Jump(target))
            }
            outstanding => {
                self.error = outstanding;
                Ok(Step::Stop)
            }
        }
    }

    /// Fork that absorbs a break for its own label
    ///
    /// The branch that raised the break ends without a value; the search
    /// then continues with older forks.
    pub(super) fn op_fork_label(&mut self, label: &Arc<str>) -> VmResult<Step> {
        if !self.backtrack {
            self.push_fork(Opcode::ForkLabel);
            return Ok(Step::Next);
        }
        if let Some(VmError::Break { label: raised }) = &self.error {
            if raised == label {
                trace!(target: "filtervm::vm::nondet", pc = self.pc, label = %label, "break absorbed");
                self.error = None;
            }
        }
        Ok(Step::Stop)
    }

    // === Iteration ===

    /// Produce one result per entry of an array, object or pending entry list
    ///
    /// The remaining entries stay on the stack under a fork, so each resume
    /// of this instruction yields the next entry.
    pub(super) fn op_each(&mut self) -> VmResult<Step> {
        if self.error.is_some() {
            return Ok(Step::Stop);
        }
        self.backtrack = false;

        let entries = match self.pop()? {
            Operand::Entries(entries) => entries,
            Operand::Value(value) => {
                if self.tracking_paths() && self.paths.top().map(PathEntry::value) != Some(&value) {
                    return Err(VmError::InvalidPath { value });
                }
                match entries_of(&value) {
                    Some(entries) => entries,
                    None => return Err(VmError::CannotIterate { value }),
                }
            }
            other => {
                return Err(VmError::InvalidOperand {
                    expected: "value",
                    got: other.kind_name(),
                })
            }
        };

        let Some((key, value)) = entries.current().cloned() else {
            return Ok(Step::Stop);
        };
        if entries.remaining() > 1 {
            self.push(Operand::Entries(entries.advanced()));
            self.push_fork(Opcode::Each);
            self.pop()?;
        }
        if self.tracking_paths() {
            self.paths.push(PathEntry::Step {
                component: key,
                value: value.clone(),
            });
        }
        self.push_value(value);
        Ok(Step::Next)
    }

    /// Record an error; fatal ones discard every pending fork
    pub(super) fn raise(&mut self, err: VmError) {
        if err.is_fatal() {
            debug!(
                target: "filtervm::vm",
                pc = self.pc,
                error = %err,
                dropped_forks = self.forks.len(),
                "fatal error"
            );
            self.forks.clear();
        }
        self.error = Some(err);
    }
}

/// Index/key and value pairs in iteration order; objects iterate by key
fn entries_of(value: &Value) -> Option<Entries> {
    let items: Arc<[(Value, Value)]> = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v.clone()))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect(),
        _ => return None,
    };
    Some(Entries { items, next: 0 })
}
