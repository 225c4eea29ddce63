//! Bytecode instructions for the filter VM
//!
//! [`Opcode`] is the bare operation code, used for mnemonics and tracing.
//! [`Instruction`] pairs an opcode with the one operand its shape calls for;
//! instructions are produced by an external compiler (or [`ProgramBuilder`])
//! and never change afterwards.
//!
//! [`ProgramBuilder`]: super::chunk::ProgramBuilder

use std::fmt;
use std::sync::Arc;

use crate::models::Value;

/// Identity of a static scope site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Dense index of a function in a [`NativeRegistry`](super::native_registry::NativeRegistry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u16);

/// Variable address: local slot within the nearest live activation of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopedSlot {
    pub scope: ScopeId,
    pub slot: usize,
}

impl ScopedSlot {
    pub const fn new(scope: u32, slot: usize) -> Self {
        Self {
            scope: ScopeId(scope),
            slot,
        }
    }
}

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Stack Operations ===
    /// No operation
    Nop = 0x00,
    /// Push an immediate value
    Push = 0x01,
    /// Discard top of stack
    Pop = 0x02,
    /// Duplicate top of stack
    Dup = 0x03,
    /// Swap top two stack elements
    Swap = 0x04,
    /// Replace top of stack with an immediate value
    Const = 0x05,

    // === Variables ===
    /// Push a register value
    Load = 0x10,
    /// Pop into a register
    Store = 0x11,
    /// Pop a value and append it to the array held in a register
    Append = 0x12,

    // === Value Construction ===
    /// Build an object from N key/value pairs
    Object = 0x18,

    // === Nondeterminism ===
    /// Branch point: primary falls through, alternative jumps to target
    Fork = 0x20,
    /// Branch point that only resumes when an error is outstanding
    ForkOpt = 0x21,
    /// Branch point that absorbs a matching break signal
    ForkLabel = 0x22,
    /// Abandon the current continuation
    Backtrack = 0x23,
    /// Expand an array/object into one result per entry
    Each = 0x24,

    // === Control Flow ===
    /// Unconditional jump
    Jump = 0x30,
    /// Pop, jump when the value is null or false
    JumpIfNot = 0x31,
    /// Direct call to a bytecode function
    Call = 0x32,
    /// Call a native function
    CallNative = 0x33,
    /// Push a closure capturing a target pc and the current scope cursor
    PushPc = 0x34,
    /// Pop a closure and call it
    CallPc = 0x35,
    /// Enter a new lexical scope
    Scope = 0x36,
    /// Leave the current scope
    Ret = 0x37,

    // === Path Tracking ===
    /// Start recording a navigation path
    PathBegin = 0x40,
    /// Validate and collect the recorded path
    PathEnd = 0x41,
}

impl Opcode {
    /// Get the mnemonic for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::Const => "const",
            Self::Load => "load",
            Self::Store => "store",
            Self::Append => "append",
            Self::Object => "object",
            Self::Fork => "fork",
            Self::ForkOpt => "forkopt",
            Self::ForkLabel => "forklabel",
            Self::Backtrack => "backtrack",
            Self::Each => "each",
            Self::Jump => "jump",
            Self::JumpIfNot => "jumpifnot",
            Self::Call => "call",
            Self::CallNative => "callnative",
            Self::PushPc => "pushpc",
            Self::CallPc => "callpc",
            Self::Scope => "scope",
            Self::Ret => "ret",
            Self::PathBegin => "pathbegin",
            Self::PathEnd => "pathend",
        }
    }

    /// Whether resuming at this opcode is a legal backtrack target
    pub fn is_resume_point(self) -> bool {
        matches!(
            self,
            Self::Fork | Self::ForkOpt | Self::ForkLabel | Self::Each | Self::Ret
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// A single VM instruction with its operand
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Nop,
    Push(Value),
    Pop,
    Dup,
    Swap,
    Const(Value),
    Load(ScopedSlot),
    Store(ScopedSlot),
    Append(ScopedSlot),
    /// Number of key/value pairs
    Object(usize),
    /// Alternative branch target
    Fork(usize),
    /// Recovery branch target
    ForkOpt(usize),
    /// Label name matched against break signals
    ForkLabel(Arc<str>),
    Backtrack,
    Each,
    Jump(usize),
    JumpIfNot(usize),
    /// Entry pc of the callee
    Call(usize),
    CallNative { id: NativeId, argc: usize },
    /// Entry pc captured by the closure
    PushPc(usize),
    CallPc,
    /// Scope identity and number of register slots it needs
    Scope { id: ScopeId, slots: usize },
    Ret,
    PathBegin,
    PathEnd,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::Push(_) => Opcode::Push,
            Self::Pop => Opcode::Pop,
            Self::Dup => Opcode::Dup,
            Self::Swap => Opcode::Swap,
            Self::Const(_) => Opcode::Const,
            Self::Load(_) => Opcode::Load,
            Self::Store(_) => Opcode::Store,
            Self::Append(_) => Opcode::Append,
            Self::Object(_) => Opcode::Object,
            Self::Fork(_) => Opcode::Fork,
            Self::ForkOpt(_) => Opcode::ForkOpt,
            Self::ForkLabel(_) => Opcode::ForkLabel,
            Self::Backtrack => Opcode::Backtrack,
            Self::Each => Opcode::Each,
            Self::Jump(_) => Opcode::Jump,
            Self::JumpIfNot(_) => Opcode::JumpIfNot,
            Self::Call(_) => Opcode::Call,
            Self::CallNative { .. } => Opcode::CallNative,
            Self::PushPc(_) => Opcode::PushPc,
            Self::CallPc => Opcode::CallPc,
            Self::Scope { .. } => Opcode::Scope,
            Self::Ret => Opcode::Ret,
            Self::PathBegin => Opcode::PathBegin,
            Self::PathEnd => Opcode::PathEnd,
        }
    }

    #[inline]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode().mnemonic()
    }

    /// Jump-style target operand, if any
    pub fn target(&self) -> Option<usize> {
        match self {
            Self::Fork(t)
            | Self::ForkOpt(t)
            | Self::Jump(t)
            | Self::JumpIfNot(t)
            | Self::Call(t)
            | Self::PushPc(t) => Some(*t),
            _ => None,
        }
    }

    /// Mutable access to the target operand, used when patching jumps
    pub(crate) fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Self::Fork(t)
            | Self::ForkOpt(t)
            | Self::Jump(t)
            | Self::JumpIfNot(t)
            | Self::Call(t)
            | Self::PushPc(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Self::Push(v) | Self::Const(v) => write!(f, "{} {}", mnemonic, v),
            Self::Load(s) | Self::Store(s) | Self::Append(s) => {
                write!(f, "{} [{},{}]", mnemonic, s.scope.0, s.slot)
            }
            Self::Object(n) => write!(f, "{} {}", mnemonic, n),
            Self::ForkLabel(label) => write!(f, "{} {}", mnemonic, label),
            Self::CallNative { id, argc } => write!(f, "{} #{} argc={}", mnemonic, id.0, argc),
            Self::Scope { id, slots } => write!(f, "{} [{},{}]", mnemonic, id.0, slots),
            other => match other.target() {
                Some(target) => write!(f, "{} -> {:04}", mnemonic, target),
                None => f.write_str(mnemonic),
            },
        }
    }
}
