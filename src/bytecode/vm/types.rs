//! Type definitions for the bytecode VM.
//!
//! This module contains the core types used throughout the VM:
//! - VmError / ErrorKind: errors and how they unwind
//! - Operand: what lives on the operand stack and in registers
//! - Scope, CallSite, Fork, PathEntry: records kept on the VM's stacks
//! - VmConfig: VM configuration options

use std::sync::Arc;

use serde::Deserialize;

use super::checkpoint_stack::Checkpoint;
use crate::bytecode::native_registry::NativeError;
use crate::bytecode::opcodes::{NativeId, Opcode, ScopeId};
use crate::models::Value;

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// How an error travels through pending forks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caught by the nearest fork-with-fallback
    Ordinary,
    /// Caught only by a labeled fork of the same name
    Break,
    /// Unwinds through every fork, never caught
    Cancellation,
    /// Compiler invariant violation; pending forks are dropped
    Fatal,
}

/// Why a run was canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    DeadlineExceeded,
}

/// Errors that can occur during VM execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Object construction with a non-string key
    ObjectKeyNotString { key: Value },
    /// `each` over a value that is neither array nor object
    CannotIterate { value: Value },
    /// A path expression computed a value instead of navigating to it
    InvalidPath { value: Value },
    /// Labeled non-local exit
    Break { label: Arc<str> },
    /// Error surfaced by a native function
    Native(NativeError),
    /// External cancellation or deadline
    Canceled(CancelReason),
    /// Pop from an empty stack
    StackUnderflow,
    /// Variable address names a scope with no live activation
    UnknownScope(ScopeId),
    /// Native call references an unregistered function
    UnknownNative(NativeId),
    /// Operand of the wrong kind for the instruction
    InvalidOperand { expected: &'static str, got: &'static str },
    /// Register address past the register file
    RegisterOutOfBounds(usize),
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectKeyNotString { .. }
            | Self::CannotIterate { .. }
            | Self::InvalidPath { .. }
            | Self::Native(_) => ErrorKind::Ordinary,
            Self::Break { .. } => ErrorKind::Break,
            Self::Canceled(_) => ErrorKind::Cancellation,
            Self::StackUnderflow
            | Self::UnknownScope(_)
            | Self::UnknownNative(_)
            | Self::InvalidOperand { .. }
            | Self::RegisterOutOfBounds(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a fork-with-fallback may recover from this error
    #[inline]
    pub fn is_catchable(&self) -> bool {
        self.kind() == ErrorKind::Ordinary
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// The value pushed when a fork-with-fallback recovers from this error
    pub fn catch_value(&self) -> Value {
        match self {
            Self::Native(e) => e.catch_value(),
            other => Value::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectKeyNotString { key } => write!(
                f,
                "expected a string for object key but got: {} ({})",
                key.type_name(),
                key.preview()
            ),
            Self::CannotIterate { value } => write!(
                f,
                "cannot iterate over: {} ({})",
                value.type_name(),
                value.preview()
            ),
            Self::InvalidPath { value } => write!(
                f,
                "invalid path against: {} ({})",
                value.type_name(),
                value.preview()
            ),
            Self::Break { label } => write!(f, "break {}", label),
            Self::Native(e) => write!(f, "{}", e),
            Self::Canceled(CancelReason::Requested) => write!(f, "execution canceled"),
            Self::Canceled(CancelReason::DeadlineExceeded) => {
                write!(f, "execution deadline exceeded")
            }
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::UnknownScope(id) => write!(f, "No live activation of scope {}", id.0),
            Self::UnknownNative(id) => write!(f, "Native function #{} not registered", id.0),
            Self::InvalidOperand { expected, got } => {
                write!(f, "Invalid operand: expected {}, got {}", expected, got)
            }
            Self::RegisterOutOfBounds(index) => {
                write!(f, "Register {} out of bounds", index)
            }
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Native(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NativeError> for VmError {
    fn from(e: NativeError) -> Self {
        match e {
            NativeError::Break(label) => Self::Break { label },
            NativeError::NotFound(id) => Self::UnknownNative(NativeId(id)),
            other => Self::Native(other),
        }
    }
}

/// What the dispatch loop does after an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Fall through to pc + 1
    Next,
    /// Continue at the given pc
    Jump(usize),
    /// Abandon the current continuation and resume the latest fork
    Stop,
    /// Suspend with a result; the next pull resumes in backtrack mode
    Yield(Value),
}

/// A closure: entry pc plus the scope cursor that was live at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub pc: usize,
    pub scope: Option<usize>,
}

/// Remaining (key, value) pairs of an `each` expansion
#[derive(Debug, Clone, PartialEq)]
pub struct Entries {
    pub items: Arc<[(Value, Value)]>,
    pub next: usize,
}

impl Entries {
    #[inline]
    pub fn remaining(&self) -> usize {
        self.items.len() - self.next
    }

    #[inline]
    pub fn current(&self) -> Option<&(Value, Value)> {
        self.items.get(self.next)
    }

    pub fn advanced(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            next: self.next + 1,
        }
    }
}

/// Anything that can sit on the operand stack or in a register
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Closure(Closure),
    Entries(Entries),
}

impl Operand {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Closure(_) => "closure",
            Self::Entries(_) => "entries",
        }
    }

    pub fn into_value(self) -> VmResult<Value> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(VmError::InvalidOperand {
                expected: "value",
                got: other.kind_name(),
            }),
        }
    }
}

impl Default for Operand {
    fn default() -> Self {
        Self::Value(Value::Null)
    }
}

/// One lexical activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    /// Static scope identity
    pub id: ScopeId,
    /// Base register address of this activation
    pub offset: usize,
    /// pc of the instruction that called into this scope
    pub return_pc: usize,
    /// Scope cursor of the caller, restored on return
    pub saved: Option<usize>,
}

/// Pending call recorded by `call`/`callpc` for the next `scope`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub return_pc: usize,
    pub caller: Option<usize>,
}

/// A remembered alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    /// pc of the instruction that created the fork; resumed in backtrack mode
    pub pc: usize,
    pub op: Opcode,
    pub stack: Checkpoint,
    pub scopes: Checkpoint,
    pub paths: Checkpoint,
    pub path_depth: Option<usize>,
}

/// Record on the path stack
#[derive(Debug, Clone, PartialEq)]
pub enum PathEntry {
    /// Baseline of a path expression, with the enclosing expression's depth
    Begin { value: Value, outer: Option<usize> },
    /// One navigation step
    Step { component: Value, value: Value },
}

impl PathEntry {
    /// Value reached at this point of the path
    #[inline]
    pub fn value(&self) -> &Value {
        match self {
            Self::Begin { value, .. } | Self::Step { value, .. } => value,
        }
    }
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Emit a trace event per dispatched instruction
    pub trace: bool,
    /// Instructions between interrupt polls (native calls always poll)
    pub interrupt_check_interval: u32,
    /// Maximum number of idle environments kept for reuse
    pub pool_capacity: usize,
    /// Register slots reserved when a fresh environment is created
    pub initial_registers: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace: false,
            interrupt_check_interval: 256,
            pool_capacity: 32,
            initial_registers: 16,
        }
    }
}

impl VmConfig {
    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(ConfigError)
    }
}

/// Error loading a [`VmConfig`]
#[derive(Debug)]
pub struct ConfigError(toml::de::Error);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid VM configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}
