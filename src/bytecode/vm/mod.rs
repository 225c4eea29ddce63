//! Bytecode Virtual Machine
//!
//! The VM runs a [`Program`] against one input value and produces results
//! lazily: an [`Execution`] is an iterator, and each `next()` runs the
//! dispatch loop until a result is completed, the run fails, or every
//! alternative is exhausted. Backtracking is an explicit state machine over
//! checkpointable stacks; no native recursion is used, so a suspended run
//! costs nothing but its environment.
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, Operand, Fork, etc.)
//! - `checkpoint_stack`: Persistent stack with O(1) checkpoint/restore
//! - `scope_stack`: Lexical scope chain
//! - `env`: Execution environment and its pool
//! - `interrupt`: Cooperative cancellation
//! - `stack`: Stack manipulation operations
//! - `control_flow`: Jumps, calls, scopes, returns and registers
//! - `nondeterminism`: Fork, backtrack, each
//! - `paths`: Path tracking
//! - `advanced_calls`: Native calls

use std::iter::FusedIterator;
use std::sync::Arc;

use tracing::{debug, trace};

use super::chunk::Program;
use super::opcodes::Instruction;
use crate::models::Value;

// === Submodules ===

mod advanced_calls;
mod checkpoint_stack;
mod control_flow;
mod env;
mod interrupt;
mod nondeterminism;
mod paths;
mod scope_stack;
mod stack;
mod types;

#[cfg(test)]
mod tests;

// === Re-exports ===

pub use checkpoint_stack::{Checkpoint, CheckpointStack};
pub use interrupt::Interrupt;
pub use types::{CancelReason, ConfigError, ErrorKind, VmConfig, VmError, VmResult};

use env::Env;
use types::Step;

// === BytecodeVM Struct ===

/// The Bytecode Virtual Machine
///
/// Cheap to clone; holds only the shared program and configuration. All
/// per-run state lives in the environment owned by each [`Execution`].
#[derive(Debug, Clone)]
pub struct BytecodeVM {
    program: Arc<Program>,
    config: VmConfig,
}

impl BytecodeVM {
    /// Create a new VM for the given program
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    /// Create a new VM with custom configuration
    pub fn with_config(program: Arc<Program>, config: VmConfig) -> Self {
        Self { program, config }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Start a run over `input`
    pub fn execute(&self, input: Value) -> Execution {
        self.start(input, None)
    }

    /// Start a run that stops with [`VmError::Canceled`] once `interrupt` trips
    pub fn execute_with_interrupt(&self, input: Value, interrupt: Interrupt) -> Execution {
        self.start(input, Some(interrupt))
    }

    /// Run to completion, returning every result or the first error
    pub fn run(&self, input: Value) -> VmResult<Vec<Value>> {
        self.execute(input).collect()
    }

    fn start(&self, input: Value, interrupt: Option<Interrupt>) -> Execution {
        debug!(target: "filtervm::vm", program = self.program.name(), "execute");
        Execution {
            program: Arc::clone(&self.program),
            env: Some(Env::acquire(&self.config, input, interrupt)),
            pool_capacity: self.config.pool_capacity,
        }
    }
}

// === Execution ===

/// A run in progress, pulled one result at a time
///
/// `Some(Ok(value))` is a result, `Some(Err(e))` is the terminal error
/// (results already produced stand), and `None` means no more results.
/// Dropping the execution early abandons the remaining alternatives.
#[derive(Debug)]
pub struct Execution {
    program: Arc<Program>,
    env: Option<Box<Env>>,
    pool_capacity: usize,
}

impl Iterator for Execution {
    type Item = VmResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let env = self.env.as_mut()?;
        let item = env.next_result(&self.program);
        if item.is_none() || matches!(item, Some(Err(_))) {
            if let Some(env) = self.env.take() {
                Env::release(env, self.pool_capacity);
            }
        }
        item
    }
}

impl FusedIterator for Execution {}

impl Drop for Execution {
    fn drop(&mut self) {
        if let Some(env) = self.env.take() {
            Env::release(env, self.pool_capacity);
        }
    }
}

// === Dispatch Loop ===

impl Env {
    /// Run until the next result, the terminal error, or exhaustion
    fn next_result(&mut self, program: &Program) -> Option<VmResult<Value>> {
        if self.finished {
            return None;
        }
        loop {
            let step = match program.get(self.pc) {
                Some(instruction) => match self.step(program, instruction) {
                    Ok(step) => step,
                    Err(err) => {
                        trace!(target: "filtervm::vm::step", pc = self.pc, error = %err, "raise");
                        self.raise(err);
                        Step::Stop
                    }
                },
                // ran off the end of the program
                None => Step::Stop,
            };

            match step {
                Step::Next => self.pc += 1,
                Step::Jump(target) => self.pc = target,
                Step::Yield(value) => {
                    self.backtrack = true;
                    return Some(Ok(value));
                }
                Step::Stop => {
                    if self.pop_fork() {
                        continue;
                    }
                    self.finished = true;
                    return match self.error.take() {
                        Some(err) => {
                            debug!(target: "filtervm::vm", pc = self.pc, error = %err, "run failed");
                            Some(Err(err))
                        }
                        None => None,
                    };
                }
            }
        }
    }

    /// Execute a single instruction
    fn step(&mut self, program: &Program, instruction: &Instruction) -> VmResult<Step> {
        if self.config.trace {
            trace!(
                target: "filtervm::vm::step",
                pc = self.pc,
                instruction = %program.disassemble_instruction(self.pc),
                backtrack = self.backtrack,
                forks = self.forks.len(),
            );
        }

        self.ticks += 1;
        if self.ticks >= self.config.interrupt_check_interval {
            self.poll_interrupt()?;
        }

        debug_assert!(
            !self.backtrack || instruction.opcode().is_resume_point(),
            "resumed at {}",
            instruction.mnemonic()
        );

        match instruction {
            // Stack operations
            Instruction::Nop => Ok(Step::Next),
            Instruction::Push(value) => {
                self.push_value(value.clone());
                Ok(Step::Next)
            }
            Instruction::Pop => self.op_pop(),
            Instruction::Dup => self.op_dup(),
            Instruction::Swap => self.op_swap(),
            Instruction::Const(value) => self.op_const(value),

            // Registers and construction
            Instruction::Load(addr) => self.op_load(*addr),
            Instruction::Store(addr) => self.op_store(*addr),
            Instruction::Append(addr) => self.op_append(*addr),
            Instruction::Object(pairs) => self.op_object(*pairs),

            // Nondeterminism
            Instruction::Fork(target) => self.op_fork(*target),
            Instruction::ForkOpt(target) => self.op_fork_opt(*target),
            Instruction::ForkLabel(label) => self.op_fork_label(label),
            Instruction::Backtrack => Ok(Step::Stop),
            Instruction::Each => self.op_each(),

            // Control flow
            Instruction::Jump(target) => Ok(Step::Jump(*target)),
            Instruction::JumpIfNot(target) => self.op_jump_if_not(*target),
            Instruction::Call(target) => self.op_call(*target),
            Instruction::CallNative { id, argc } => self.op_call_native(program, *id, *argc),
            Instruction::PushPc(target) => self.op_push_pc(*target),
            Instruction::CallPc => self.op_call_pc(),
            Instruction::Scope { id, slots } => self.op_scope(*id, *slots, program.len()),
            Instruction::Ret => self.op_ret(),

            // Path tracking
            Instruction::PathBegin => self.op_path_begin(),
            Instruction::PathEnd => self.op_path_end(),
        }
    }
}
