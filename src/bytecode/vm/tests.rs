//! Tests for the bytecode VM.
//!
//! Programs are assembled by hand; pcs in comments are the instruction
//! indices.

use std::sync::Arc;
use std::time::Instant;

use super::types::{CancelReason, ErrorKind, VmConfig, VmError};
use super::{BytecodeVM, Interrupt};
use crate::bytecode::chunk::{Program, ProgramBuilder};
use crate::bytecode::native_registry::{NativeError, NativeRegistry};
use crate::bytecode::opcodes::{Instruction, ScopeId, ScopedSlot};
use crate::models::Value;

use Instruction::*;

fn build(code: impl IntoIterator<Item = Instruction>) -> Arc<Program> {
    let mut builder = ProgramBuilder::new("test");
    for instruction in code {
        builder.emit(instruction);
    }
    builder.build_arc()
}

/// Call instruction for a core native; builders register the same core set
fn native(name: &str) -> Instruction {
    let registry = NativeRegistry::with_core();
    let id = registry.get_id(name).expect("core native");
    CallNative {
        id,
        argc: registry.arity(id).expect("core native"),
    }
}

fn scope(id: u32, slots: usize) -> Instruction {
    Scope {
        id: ScopeId(id),
        slots,
    }
}

fn outputs(program: Arc<Program>, input: Value) -> Vec<Result<Value, VmError>> {
    BytecodeVM::new(program).execute(input).collect()
}

fn s(text: &str) -> Value {
    Value::from(text)
}

// === Result Protocol ===

#[test]
fn test_single_result_then_exhausted() {
    let program = build([scope(0, 0), Const(Value::Int(42)), Ret]);
    let vm = BytecodeVM::new(program);
    let mut execution = vm.execute(Value::Null);

    assert_eq!(execution.next(), Some(Ok(Value::Int(42))));
    assert_eq!(execution.next(), None);
    assert_eq!(execution.next(), None);
}

#[test]
fn test_identity() {
    let program = build([scope(0, 0), Ret]);
    let input = Value::object([("a", Value::array([Value::Int(1)]))]);
    assert_eq!(BytecodeVM::new(program).run(input.clone()), Ok(vec![input]));
}

#[test]
fn test_fork_yields_primary_first() {
    let program = build([
        scope(0, 0),           // 0
        Fork(4),               // 1
        Const(Value::Int(1)),  // 2
        Ret,                   // 3
        Const(Value::Int(2)),  // 4
        Ret,                   // 5
    ]);
    let vm = BytecodeVM::new(program);
    assert_eq!(vm.run(Value::Null), Ok(vec![Value::Int(1), Value::Int(2)]));
}

#[test]
fn test_backtrack_produces_nothing() {
    let program = build([scope(0, 0), Backtrack, Ret]);
    assert_eq!(BytecodeVM::new(program).run(Value::Int(1)), Ok(vec![]));
}

#[test]
fn test_running_off_the_end_produces_nothing() {
    let program = build([scope(0, 0), Const(Value::Int(1))]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![]));
}

#[test]
fn test_vm_is_reusable() {
    let program = build([scope(0, 0), Each, Ret]);
    let vm = BytecodeVM::new(program);
    let input = Value::array([Value::Int(1), Value::Int(2), Value::Int(3)]);

    // abandon a run halfway, then run again from scratch
    let first: Vec<_> = vm.execute(input.clone()).take(1).collect();
    assert_eq!(first, vec![Ok(Value::Int(1))]);
    assert_eq!(
        vm.run(input),
        Ok(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn test_trace_does_not_change_results() {
    let config = VmConfig {
        trace: true,
        ..VmConfig::default()
    };
    let program = build([scope(0, 0), Fork(4), Const(Value::Int(1)), Ret, Const(Value::Int(2)), Ret]);
    let vm = BytecodeVM::with_config(program, config);
    assert_eq!(vm.run(Value::Null), Ok(vec![Value::Int(1), Value::Int(2)]));
}

// === Stack Operations ===

#[test]
fn test_swap_and_pop() {
    let program = build([
        scope(0, 0),
        Push(Value::Int(1)),
        Push(Value::Int(2)),
        Swap,
        Pop,
        Ret,
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![Value::Int(2)]));
}

#[test]
fn test_stack_underflow_is_fatal() {
    let program = build([scope(0, 0), Fork(5), Pop, Pop, Ret, Const(Value::Int(1)), Ret]);
    let results = outputs(program, Value::Null);
    // the pending fork is discarded along with the run
    assert_eq!(results, vec![Err(VmError::StackUnderflow)]);
    assert_eq!(VmError::StackUnderflow.kind(), ErrorKind::Fatal);
}

// === Jumps ===

#[test]
fn test_jump_if_not_only_null_and_false() {
    let program = build([
        scope(0, 0),        // 0
        Dup,                // 1
        JumpIfNot(5),       // 2
        Const(s("yes")),    // 3
        Ret,                // 4
        Const(s("no")),     // 5
        Ret,                // 6
    ]);
    let vm = BytecodeVM::new(program);
    assert_eq!(vm.run(Value::Null), Ok(vec![s("no")]));
    assert_eq!(vm.run(Value::Bool(false)), Ok(vec![s("no")]));
    assert_eq!(vm.run(Value::Int(0)), Ok(vec![s("yes")]));
    assert_eq!(vm.run(s("")), Ok(vec![s("yes")]));
    assert_eq!(vm.run(Value::array([])), Ok(vec![s("yes")]));
}

// === Objects ===

#[test]
fn test_object_build() {
    let program = build([
        scope(0, 0),
        Push(s("b")),
        Push(Value::Int(2)),
        Push(s("a")),
        Push(Value::Int(1)),
        Object(2),
        Ret,
    ]);
    let expected = Value::object([("a", Value::Int(1)), ("b", Value::Int(2))]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![expected]));
}

#[test]
fn test_object_duplicate_key_last_wins() {
    let program = build([
        scope(0, 0),
        Push(s("a")),
        Push(Value::Int(1)),
        Push(s("a")),
        Push(Value::Int(2)),
        Object(2),
        Ret,
    ]);
    let expected = Value::object([("a", Value::Int(2))]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![expected]));
}

#[test]
fn test_object_non_string_key_fails_for_every_size() {
    for size in 1..=4 {
        for bad in 0..size {
            let mut code = vec![scope(0, 0)];
            for i in 0..size {
                let key = if i == bad {
                    Value::Int(i as i64)
                } else {
                    Value::from(format!("k{}", i))
                };
                code.push(Push(key));
                code.push(Push(Value::Bool(true)));
            }
            code.push(Object(size));
            code.push(Ret);

            let result = BytecodeVM::new(build(code)).run(Value::Null);
            assert_eq!(
                result,
                Err(VmError::ObjectKeyNotString {
                    key: Value::Int(bad as i64)
                }),
                "size={} bad={}",
                size,
                bad
            );
        }
    }
}

// === Iteration ===

#[test]
fn test_each_array_in_order() {
    let program = build([scope(0, 0), Each, Ret]);
    let input = Value::array([Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn test_each_object_by_key() {
    let program = build([scope(0, 0), Each, Ret]);
    let input = Value::object([("b", Value::Int(2)), ("c", Value::Int(3)), ("a", Value::Int(1))]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn test_each_empty_collections() {
    let program = build([scope(0, 0), Each, Ret]);
    let vm = BytecodeVM::new(program);
    assert_eq!(vm.run(Value::array([])), Ok(vec![]));
    assert_eq!(vm.run(Value::Object(Default::default())), Ok(vec![]));
}

#[test]
fn test_each_scalar_fails() {
    let program = build([scope(0, 0), Each, Ret]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Int(5)),
        Err(VmError::CannotIterate {
            value: Value::Int(5)
        })
    );
}

#[test]
fn test_each_nested() {
    // .[] | .[]
    let program = build([scope(0, 0), Each, Each, Ret]);
    let input = Value::array([
        Value::array([Value::Int(1), Value::Int(2)]),
        Value::array([]),
        Value::array([Value::Int(3)]),
    ]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

// === Registers ===

#[test]
fn test_append_collects_across_backtracking() {
    // [.[]]
    let program = build([
        scope(0, 1),                         // 0
        Push(Value::array([])),              // 1
        Store(ScopedSlot::new(0, 0)),        // 2
        Fork(8),                             // 3
        Each,                                // 4
        Append(ScopedSlot::new(0, 0)),       // 5
        Backtrack,                           // 6
        Nop,                                 // 7
        Pop,                                 // 8
        Load(ScopedSlot::new(0, 0)),         // 9
        Ret,                                 // 10
    ]);
    let input = Value::array([Value::Int(1), Value::Int(2)]);
    assert_eq!(BytecodeVM::new(program).run(input.clone()), Ok(vec![input]));
}

#[test]
fn test_append_to_non_array_is_fatal() {
    let program = build([
        scope(0, 1),
        Push(Value::Int(1)),
        Append(ScopedSlot::new(0, 0)),
        Ret,
    ]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Null),
        Err(VmError::InvalidOperand {
            expected: "array",
            got: "null"
        })
    );
}

#[test]
fn test_register_file_grows() {
    let slot = ScopedSlot::new(0, 39);
    let program = build([scope(0, 40), Store(slot), Load(slot), Ret]);
    assert_eq!(BytecodeVM::new(program).run(s("x")), Ok(vec![s("x")]));
}

#[test]
fn test_unknown_scope_is_fatal() {
    let program = build([
        scope(0, 0),
        Fork(4),
        Load(ScopedSlot::new(9, 0)),
        Ret,
        Const(Value::Int(1)),
        Ret,
    ]);
    let results = outputs(program, Value::Null);
    assert_eq!(results, vec![Err(VmError::UnknownScope(ScopeId(9)))]);
}

// === Calls and Closures ===

#[test]
fn test_static_call_returns_to_caller() {
    let program = build([
        scope(0, 0),             // 0
        Call(4),                 // 1
        Ret,                     // 2
        Nop,                     // 3
        scope(1, 0),             // 4
        Const(Value::Int(7)),    // 5
        Ret,                     // 6
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![Value::Int(7)]));
}

#[test]
fn test_closure_resolves_captured_scope() {
    // . as $x | def f(g): g; f($x)
    let program = build([
        scope(0, 1),                   // 0
        Store(ScopedSlot::new(0, 0)),  // 1  $x
        PushPc(7),                     // 2  closure for $x
        Call(10),                      // 3  f
        Ret,                           // 4
        Nop,                           // 5
        Nop,                           // 6
        scope(2, 0),                   // 7  closure body
        Load(ScopedSlot::new(0, 0)),   // 8
        Ret,                           // 9
        scope(1, 1),                   // 10 f
        Store(ScopedSlot::new(1, 0)),  // 11 g
        Load(ScopedSlot::new(1, 0)),   // 12
        CallPc,                        // 13
        Ret,                           // 14
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Int(42)), Ok(vec![Value::Int(42)]));
}

#[test]
fn test_generator_function_yields_through_caller() {
    // def f: 1, 2; f
    let program = build([
        scope(0, 0),             // 0
        Call(3),                 // 1
        Ret,                     // 2
        scope(1, 0),             // 3
        Fork(7),                 // 4
        Const(Value::Int(1)),    // 5
        Ret,                     // 6
        Const(Value::Int(2)),    // 7
        Ret,                     // 8
    ]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Null),
        Ok(vec![Value::Int(1), Value::Int(2)])
    );
}

#[test]
fn test_call_pc_requires_closure() {
    let program = build([scope(0, 0), Push(Value::Int(3)), CallPc, Ret]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Null),
        Err(VmError::InvalidOperand {
            expected: "closure",
            got: "value"
        })
    );
}

// === Native Calls ===

#[test]
fn test_native_index() {
    // .a
    let program = build([scope(0, 0), Push(s("a")), Swap, Dup, native("_index"), Ret]);
    let input = Value::object([("a", Value::Int(1))]);
    assert_eq!(BytecodeVM::new(program).run(input), Ok(vec![Value::Int(1)]));
}

#[test]
fn test_native_receives_input() {
    let program = build([scope(0, 0), native("type"), Ret]);
    assert_eq!(BytecodeVM::new(program).run(Value::array([])), Ok(vec![s("array")]));
}

#[test]
fn test_custom_native() {
    let mut builder = ProgramBuilder::new("custom");
    builder.register_native("length", 0, |input, _args| match input {
        Value::Array(items) => Ok(Value::from(items.len())),
        other => Err(NativeError::TypeError {
            expected: "array",
            got: other.type_name().to_string(),
        }),
    });
    builder.emit(scope(0, 0));
    builder.emit_native("length").unwrap();
    builder.emit(Ret);
    let vm = BytecodeVM::new(builder.build_arc());

    assert_eq!(vm.run(Value::array([Value::Null, Value::Null])), Ok(vec![Value::Int(2)]));
    assert_eq!(
        vm.run(Value::Null),
        Err(VmError::Native(NativeError::TypeError {
            expected: "array",
            got: "null".to_string()
        }))
    );
}

// === Errors and Recovery ===

#[test]
fn test_error_after_results() {
    let program = build([
        scope(0, 0),           // 0
        Fork(4),               // 1
        Const(Value::Int(1)),  // 2
        Ret,                   // 3
        Push(s("bad")),        // 4
        Swap,                  // 5
        native("error"),       // 6
        Ret,                   // 7
    ]);
    let mut execution = BytecodeVM::new(program).execute(Value::Null);
    assert_eq!(execution.next(), Some(Ok(Value::Int(1))));
    assert_eq!(
        execution.next(),
        Some(Err(VmError::Native(NativeError::Thrown(s("bad")))))
    );
    assert_eq!(execution.next(), None);
}

#[test]
fn test_fork_opt_catches_error() {
    // try error("boom") catch .
    let program = build([
        scope(0, 0),      // 0
        ForkOpt(6),       // 1
        Push(s("boom")),  // 2
        Swap,             // 3
        native("error"),  // 4
        Ret,              // 5
        Ret,              // 6
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![s("boom")]));
}

#[test]
fn test_fork_opt_catch_value_keeps_thrown_value() {
    let thrown = Value::object([("code", Value::Int(3))]);
    let program = build([
        scope(0, 0),
        ForkOpt(6),
        Push(thrown.clone()),
        Swap,
        native("error"),
        Ret,
        Ret,
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![thrown]));
}

#[test]
fn test_fork_opt_catches_vm_error_as_message() {
    // try {(1): 2} catch .
    let program = build([
        scope(0, 0),            // 0
        ForkOpt(6),             // 1
        Push(Value::Int(1)),    // 2
        Push(Value::Int(2)),    // 3
        Object(1),              // 4
        Ret,                    // 5
        Ret,                    // 6
    ]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Null),
        Ok(vec![s("expected a string for object key but got: number (1)")])
    );
}

#[test]
fn test_fork_opt_without_error_is_skipped() {
    let program = build([scope(0, 0), ForkOpt(4), Const(Value::Int(1)), Ret, Const(Value::Int(2)), Ret]);
    assert_eq!(BytecodeVM::new(program).run(Value::Null), Ok(vec![Value::Int(1)]));
}

#[test]
fn test_fork_opt_does_not_catch_break() {
    let program = build([
        scope(0, 0),
        ForkOpt(6),
        Push(s("out")),
        Swap,
        native("_break"),
        Ret,
        Ret,
    ]);
    let result = BytecodeVM::new(program).run(Value::Null);
    assert_eq!(result, Err(VmError::Break { label: Arc::from("out") }));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Break);
}

/// (label $name | def f: "b", break $out, "c"; f), "z"
fn label_program(name: &str) -> Arc<Program> {
    build([
        scope(0, 0),                 // 0
        Fork(5),                     // 1
        ForkLabel(Arc::from(name)),  // 2
        Call(7),                     // 3
        Ret,                         // 4
        Const(s("z")),               // 5
        Ret,                         // 6
        scope(1, 0),                 // 7
        Fork(11),                    // 8
        Const(s("b")),               // 9
        Ret,                         // 10
        Fork(16),                    // 11
        Push(s("out")),              // 12
        Swap,                        // 13
        native("_break"),            // 14
        Ret,                         // 15
        Const(s("c")),               // 16
        Ret,                         // 17
    ])
}

#[test]
fn test_label_absorbs_break_from_nested_scope() {
    let results = outputs(label_program("out"), Value::Null);
    assert_eq!(results, vec![Ok(s("b")), Ok(s("z"))]);
}

#[test]
fn test_break_passes_other_labels() {
    let results = outputs(label_program("other"), Value::Null);
    assert_eq!(
        results,
        vec![Ok(s("b")), Err(VmError::Break { label: Arc::from("out") })]
    );
}

// === Path Tracking ===

#[test]
fn test_path_of_identity_is_empty() {
    let program = build([scope(0, 0), PathBegin, Push(Value::Int(5)), PathEnd, Ret]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Int(5)),
        Ok(vec![Value::array([])])
    );
}

#[test]
fn test_path_of_computed_value_fails() {
    let program = build([scope(0, 0), PathBegin, Const(Value::Int(6)), PathEnd, Ret]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Int(5)),
        Err(VmError::InvalidPath {
            value: Value::Int(6)
        })
    );
}

#[test]
fn test_path_through_index() {
    // path(.a.b)
    let program = build([
        scope(0, 0),
        PathBegin,
        Push(s("a")),
        Swap,
        Dup,
        native("_index"),
        Push(s("b")),
        Swap,
        Dup,
        native("_index"),
        PathEnd,
        Ret,
    ]);
    let input = Value::object([("a", Value::object([("b", Value::Int(1))]))]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![Value::array([s("a"), s("b")])])
    );
}

#[test]
fn test_path_through_slice() {
    // path(.[1:])
    let program = build([
        scope(0, 0),
        PathBegin,
        Push(Value::Int(1)), // start
        Swap,
        Push(Value::Null), // end
        Swap,
        Dup,
        native("_slice"),
        PathEnd,
        Ret,
    ]);
    let input = Value::array([Value::Int(1), Value::Int(2), Value::Int(3)]);
    let component = Value::object([("start", Value::Int(1)), ("end", Value::Null)]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![Value::array([component])])
    );
}

#[test]
fn test_path_through_each() {
    // path(.[])
    let program = build([scope(0, 0), PathBegin, Each, PathEnd, Ret]);
    let input = Value::array([Value::Int(10), Value::Int(20)]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Ok(vec![
            Value::array([Value::Int(0)]),
            Value::array([Value::Int(1)])
        ])
    );
}

#[test]
fn test_path_navigation_off_path_fails() {
    // path({"x": 1} | .x) over {"a": 1}
    let other = Value::object([("x", Value::Int(1))]);
    let program = build([
        scope(0, 0),
        PathBegin,
        Const(other.clone()),
        Push(s("x")),
        Swap,
        Dup,
        native("_index"),
        PathEnd,
        Ret,
    ]);
    let input = Value::object([("a", Value::Int(1))]);
    assert_eq!(
        BytecodeVM::new(program).run(input),
        Err(VmError::InvalidPath { value: other })
    );
}

#[test]
fn test_path_error_is_catchable() {
    // try path(6) catch "caught"
    let program = build([
        scope(0, 0),            // 0
        ForkOpt(6),             // 1
        PathBegin,              // 2
        Const(Value::Int(6)),   // 3
        PathEnd,                // 4
        Ret,                    // 5
        Const(s("caught")),     // 6
        Ret,                    // 7
    ]);
    assert_eq!(BytecodeVM::new(program).run(Value::Int(5)), Ok(vec![s("caught")]));
}

#[test]
fn test_caught_path_error_is_message() {
    // try path(6) catch .
    let program = build([
        scope(0, 0),            // 0
        ForkOpt(6),             // 1
        PathBegin,              // 2
        Const(Value::Int(6)),   // 3
        PathEnd,                // 4
        Ret,                    // 5
        Ret,                    // 6
    ]);
    assert_eq!(
        BytecodeVM::new(program).run(Value::Int(5)),
        Ok(vec![s("invalid path against: number (6)")])
    );
}

// === Cancellation ===

fn spin_program() -> Arc<Program> {
    // try (loop forever) catch "caught"
    build([scope(0, 0), ForkOpt(3), Jump(2), Const(s("caught")), Ret])
}

#[test]
fn test_cancel_is_not_catchable() {
    let config = VmConfig {
        interrupt_check_interval: 4,
        ..VmConfig::default()
    };
    let vm = BytecodeVM::with_config(spin_program(), config);
    let interrupt = Interrupt::new();
    interrupt.cancel();

    let results: Vec<_> = vm.execute_with_interrupt(Value::Null, interrupt).collect();
    assert_eq!(results, vec![Err(VmError::Canceled(CancelReason::Requested))]);
}

#[test]
fn test_deadline_stops_run() {
    let config = VmConfig {
        interrupt_check_interval: 1,
        ..VmConfig::default()
    };
    let vm = BytecodeVM::with_config(spin_program(), config);
    let interrupt = Interrupt::with_deadline(Instant::now());

    let result = vm.execute_with_interrupt(Value::Null, interrupt).next();
    assert_eq!(result, Some(Err(VmError::Canceled(CancelReason::DeadlineExceeded))));
}

#[test]
fn test_native_call_polls_interrupt() {
    let config = VmConfig {
        interrupt_check_interval: u32::MAX,
        ..VmConfig::default()
    };
    let program = build([scope(0, 0), Push(s("x")), Swap, native("error"), Ret]);
    let vm = BytecodeVM::with_config(program, config);
    let interrupt = Interrupt::new();
    interrupt.cancel();

    let result = vm.execute_with_interrupt(Value::Null, interrupt).next();
    assert_eq!(result, Some(Err(VmError::Canceled(CancelReason::Requested))));
}

// === Configuration ===

#[test]
fn test_config_from_toml() {
    let config = VmConfig::from_toml_str("trace = true\npool_capacity = 4\n").unwrap();
    assert!(config.trace);
    assert_eq!(config.pool_capacity, 4);
    assert_eq!(config.interrupt_check_interval, VmConfig::default().interrupt_check_interval);

    assert_eq!(VmConfig::from_toml_str("").unwrap(), VmConfig::default());
    assert!(VmConfig::from_toml_str("trace = 3").is_err());
}
