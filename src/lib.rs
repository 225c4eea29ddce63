//! filtervm - Backtracking bytecode VM for jq-style filter programs
//!
//! This library executes compiled filter programs against tree-shaped values,
//! producing zero, one or many results per input. Results are pulled one at a
//! time; alternatives are explored by forking and backtracking over
//! checkpointable stacks rather than by recursion.
//!
//! # Architecture
//!
//! 1. **Value model** (`models` module)
//!    - `Value`: null, booleans, numbers, strings, arrays, key-ordered objects
//!      and opaque host values
//!    - Truncated previews for error messages
//!
//! 2. **Bytecode** (`bytecode` module)
//!    - Instruction set and `Program` / `ProgramBuilder`
//!    - Native function registry with path-tracking roles
//!    - The VM: fork/backtrack engine, scopes and closures, path tracking,
//!      pooled execution environments and cooperative cancellation
//!
//! # Example
//!
//! ```rust
//! use filtervm::bytecode::{BytecodeVM, Instruction, ProgramBuilder, ScopeId};
//! use filtervm::models::Value;
//!
//! // .a over {"a": 1}
//! let mut builder = ProgramBuilder::new("field");
//! builder.emit(Instruction::Scope { id: ScopeId(0), slots: 0 });
//! builder.emit(Instruction::Push(Value::from("a")));
//! builder.emit(Instruction::Swap);
//! builder.emit(Instruction::Dup);
//! builder.emit_native("_index").unwrap();
//! builder.emit(Instruction::Ret);
//!
//! let vm = BytecodeVM::new(builder.build_arc());
//! let input = Value::object([("a", Value::Int(1))]);
//! assert_eq!(vm.run(input).unwrap(), vec![Value::Int(1)]);
//! ```

pub mod bytecode;
pub mod models;

pub use bytecode::{BytecodeVM, Execution, Program, ProgramBuilder, VmConfig, VmError};
pub use models::Value;
