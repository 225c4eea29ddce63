/// Test utilities for VM integration tests
///
/// This module provides shared helpers for the scenario tests:
/// - Installing a tracing subscriber once per test binary
/// - Assembling programs from instruction lists
/// - Registering the small numeric natives the scenarios use
use std::sync::{Arc, Once};

use filtervm::bytecode::{Instruction, NativeError, Program, ProgramBuilder, ScopeId};
use filtervm::models::Value;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builder with the scenario natives registered on top of the core set
pub fn builder(name: &str) -> ProgramBuilder {
    let mut builder = ProgramBuilder::new(name);
    // input + args[0]
    builder.register_native("add", 1, |input, args| match (input, &args[0]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (a, b) => Err(NativeError::TypeError {
            expected: "number",
            got: format!("{} and {}", a.type_name(), b.type_name()),
        }),
    });
    builder
}

/// Assemble a program from a flat instruction list
pub fn assemble(name: &str, code: impl IntoIterator<Item = Instruction>) -> Arc<Program> {
    let mut builder = builder(name);
    for instruction in code {
        builder.emit(instruction);
    }
    builder.build_arc()
}

/// Emit `.key` against the value on top of the stack
pub fn emit_field(builder: &mut ProgramBuilder, key: &str) {
    builder.emit(Instruction::Push(Value::from(key)));
    builder.emit(Instruction::Swap);
    builder.emit(Instruction::Dup);
    builder.emit_native("_index").expect("core native");
}

pub fn scope(id: u32, slots: usize) -> Instruction {
    Instruction::Scope {
        id: ScopeId(id),
        slots,
    }
}
