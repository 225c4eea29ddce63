//! Execution environments and their process-wide pool.
//!
//! An [`Env`] owns every piece of mutable state of one run: the program
//! counter, the operand/path/scope stacks, the register file and the fork
//! list. Environments are recycled through a global pool; [`Env::reset`]
//! truncates buffers instead of freeing them so a reused environment keeps
//! the capacity it grew to.

use parking_lot::Mutex;
use tracing::trace;

use super::checkpoint_stack::CheckpointStack;
use super::interrupt::Interrupt;
use super::scope_stack::ScopeStack;
use super::types::{CallSite, Fork, Operand, PathEntry, VmConfig, VmError};
use crate::models::Value;

static POOL: Mutex<Vec<Box<Env>>> = parking_lot::const_mutex(Vec::new());

/// Mutable state of a single execution
#[derive(Debug, Default)]
pub struct Env {
    /// Program counter
    pub(super) pc: usize,
    /// Operand stack
    pub(super) stack: CheckpointStack<Operand>,
    /// Path-tracking stack
    pub(super) paths: CheckpointStack<PathEntry>,
    /// Lexical scope chain
    pub(super) scopes: ScopeStack,
    /// Register file, addressed by scope offset + slot
    pub(super) registers: Vec<Operand>,
    /// Next free register; never decreases during a run
    pub(super) offset: usize,
    /// Pending alternatives, most recent last
    pub(super) forks: Vec<Fork>,
    /// Resuming at a fork site rather than executing forward
    pub(super) backtrack: bool,
    /// Outstanding error, unwound through the forks
    pub(super) error: Option<VmError>,
    /// Path-stack slot of the innermost open path expression
    pub(super) path_depth: Option<usize>,
    /// Call waiting for the callee's `scope` instruction
    pub(super) call_site: Option<CallSite>,
    /// The terminal result has been reported
    pub(super) finished: bool,
    /// Instructions dispatched since the last interrupt poll
    pub(super) ticks: u32,
    pub(super) interrupt: Option<Interrupt>,
    pub(super) config: VmConfig,
}

impl Env {
    /// Take an environment from the pool (or allocate one) and load `input`
    pub fn acquire(config: &VmConfig, input: Value, interrupt: Option<Interrupt>) -> Box<Env> {
        let pooled = POOL.lock().pop();
        let mut env = match pooled {
            Some(env) => {
                trace!(target: "filtervm::vm::pool", "reusing pooled environment");
                env
            }
            None => Box::default(),
        };
        env.reset();
        env.registers.resize(config.initial_registers, Operand::default());
        env.config = config.clone();
        env.interrupt = interrupt;
        env.stack.push(Operand::Value(input));
        env
    }

    /// Hand an environment back to the pool
    ///
    /// The environment is dropped when the pool already holds `capacity`
    /// idle environments.
    pub fn release(mut env: Box<Env>, capacity: usize) {
        // drop values now rather than holding them while idle
        env.reset();
        let mut pool = POOL.lock();
        if pool.len() < capacity {
            pool.push(env);
        }
    }

    /// Clear all state, keeping allocations
    pub fn reset(&mut self) {
        self.pc = 0;
        self.stack.reset();
        self.paths.reset();
        self.scopes.reset();
        self.registers.clear();
        self.offset = 0;
        self.forks.clear();
        self.backtrack = false;
        self.error = None;
        self.path_depth = None;
        self.call_site = None;
        self.finished = false;
        self.ticks = 0;
        self.interrupt = None;
    }
}
