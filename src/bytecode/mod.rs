//! Bytecode VM Module
//!
//! This module provides the backtracking bytecode virtual machine that runs
//! compiled filter programs. Programs come from an external compiler (or
//! are assembled by hand with [`ProgramBuilder`]) and are executed lazily,
//! one result per pull.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                  Program (instructions + natives)                 │
//! └───────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      Bytecode VM (Execution)                      │
//! │                                                                   │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                │
//! │  │ Operand     │  │ Scope       │  │ Path        │                │
//! │  │ Stack       │  │ Stack       │  │ Stack       │                │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                │
//! │        checkpointed together by every fork                        │
//! │                                                                   │
//! │  ┌─────────────┐  ┌─────────────┐                                 │
//! │  │ Forks       │  │ Registers   │                                 │
//! │  │ (LIFO)      │  │             │                                 │
//! │  └─────────────┘  └─────────────┘                                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`opcodes`]: Instruction definitions
//! - [`chunk`]: Program structure and builder
//! - [`native_registry`]: Native function registry and path roles
//! - [`vm`]: Virtual machine execution engine
//!
//! # Example
//!
//! ```
//! use filtervm::bytecode::{BytecodeVM, Instruction, ProgramBuilder, ScopeId};
//! use filtervm::models::Value;
//!
//! // .[] over the input
//! let mut builder = ProgramBuilder::new("example");
//! builder.emit(Instruction::Scope { id: ScopeId(0), slots: 0 });
//! builder.emit(Instruction::Each);
//! builder.emit(Instruction::Ret);
//!
//! let vm = BytecodeVM::new(builder.build_arc());
//! let input = Value::array([Value::Int(1), Value::Int(2)]);
//! assert_eq!(vm.run(input).unwrap(), vec![Value::Int(1), Value::Int(2)]);
//! ```

pub mod chunk;
pub mod native_registry;
pub mod opcodes;
pub mod vm;

pub use chunk::{CodeInfo, JumpLabel, Program, ProgramBuilder};
pub use native_registry::{NativeError, NativeFn, NativeRegistry, NativeResult, PathRole};
pub use opcodes::{Instruction, NativeId, Opcode, ScopeId, ScopedSlot};
pub use vm::{
    BytecodeVM, CancelReason, Checkpoint, CheckpointStack, ConfigError, ErrorKind, Execution,
    Interrupt, VmConfig, VmError, VmResult,
};
