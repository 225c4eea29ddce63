//! Compiled program representation
//!
//! A [`Program`] holds the instruction sequence together with the static
//! metadata the compiler attaches: function entry names, an optional source
//! line table, and the native registry its `CallNative` instructions index.
//! Programs are immutable after building and are shared through `Arc`.

use std::sync::Arc;

use itertools::Itertools;

use super::native_registry::{NativeRegistry, NativeResult};
use super::opcodes::{Instruction, NativeId};
use crate::models::Value;

/// Name of the function whose code starts at `pc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInfo {
    pub name: String,
    pub pc: usize,
}

/// A compiled filter program
#[derive(Debug, Clone)]
pub struct Program {
    /// The instructions
    code: Vec<Instruction>,

    /// Function entry points, sorted by pc
    code_infos: Vec<CodeInfo>,

    /// Source line information: (pc, line_number), sorted by pc
    line_info: Vec<(usize, u32)>,

    /// Name of this program (for debugging)
    name: String,

    /// Natives referenced by `CallNative`
    natives: Arc<NativeRegistry>,
}

/// Handle to a jump-style instruction whose target is not known yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an unpatched jump points at pc 0"]
pub struct JumpLabel {
    pc: usize,
}

/// Builder for constructing Programs
#[derive(Debug)]
pub struct ProgramBuilder {
    code: Vec<Instruction>,
    code_infos: Vec<CodeInfo>,
    line_info: Vec<(usize, u32)>,
    name: String,
    natives: NativeRegistry,
    current_line: Option<u32>,
}

impl Program {
    /// Number of instructions
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Instruction at `pc`
    #[inline]
    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.code.get(pc)
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn code_infos(&self) -> &[CodeInfo] {
        &self.code_infos
    }

    /// Name of the function containing `pc`
    pub fn function_at(&self, pc: usize) -> Option<&str> {
        match self.code_infos.binary_search_by_key(&pc, |info| info.pc) {
            Ok(idx) => Some(&self.code_infos[idx].name),
            Err(idx) if idx > 0 => Some(&self.code_infos[idx - 1].name),
            _ => None,
        }
    }

    /// Get the source line for an instruction
    pub fn get_line(&self, pc: usize) -> Option<u32> {
        match self.line_info.binary_search_by_key(&pc, |&(o, _)| o) {
            Ok(idx) => Some(self.line_info[idx].1),
            Err(idx) if idx > 0 => Some(self.line_info[idx - 1].1),
            _ => None,
        }
    }

    /// Disassemble the program to a string
    pub fn disassemble(&self) -> String {
        let listing = (0..self.code.len())
            .map(|pc| {
                let label = self
                    .code_infos
                    .iter()
                    .filter(|info| info.pc == pc)
                    .map(|info| format!("{}:\n", info.name))
                    .join("");
                let line = self.get_line(pc).map_or(String::new(), |l| format!("{:4} ", l));
                format!("{}{:04} {}{}\n", label, pc, line, self.disassemble_instruction(pc))
            })
            .join("");
        format!(
            "=== {} ===\ninstructions: {}, natives: {}\n{}",
            self.name,
            self.code.len(),
            self.natives.len(),
            listing
        )
    }

    /// Disassemble a single instruction, naming native callees
    pub fn disassemble_instruction(&self, pc: usize) -> String {
        match self.code.get(pc) {
            Some(Instruction::CallNative { id, argc }) => match self.natives.get_name(*id) {
                Some(name) => format!("callnative {} argc={}", name, argc),
                None => format!("callnative #{} argc={}", id.0, argc),
            },
            Some(instruction) => instruction.to_string(),
            None => "???".to_string(),
        }
    }
}

impl ProgramBuilder {
    /// Create a builder whose registry holds the core built-ins
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_natives(name, NativeRegistry::with_core())
    }

    /// Create a builder over a caller-supplied registry
    pub fn with_natives(name: impl Into<String>, natives: NativeRegistry) -> Self {
        Self {
            code: Vec::with_capacity(64),
            code_infos: Vec::new(),
            line_info: Vec::new(),
            name: name.into(),
            natives,
            current_line: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pc the next instruction will occupy
    #[inline]
    pub fn current_pc(&self) -> usize {
        self.code.len()
    }

    /// Registry the program's native calls resolve against
    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// Register a native on the program's registry, returning its ID
    pub fn register_native<F>(&mut self, name: &str, arity: usize, func: F) -> NativeId
    where
        F: Fn(&Value, &[Value]) -> NativeResult + Send + Sync + 'static,
    {
        self.natives.register(name, arity, func)
    }

    /// Look up a registered native by name
    pub fn native(&self, name: &str) -> Option<NativeId> {
        self.natives.get_id(name)
    }

    /// Set the current source line for subsequent instructions
    pub fn set_line(&mut self, line: u32) {
        self.current_line = Some(line);
    }

    /// Record that a function named `name` starts at the current pc
    pub fn mark_function(&mut self, name: impl Into<String>) {
        self.code_infos.push(CodeInfo {
            name: name.into(),
            pc: self.code.len(),
        });
    }

    /// Emit an instruction, returning its pc
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.emit_line_info();
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Emit a native call by registered name
    ///
    /// Returns `None` when no native of that name is registered.
    pub fn emit_native(&mut self, name: &str) -> Option<usize> {
        let id = self.natives.get_id(name)?;
        let argc = self.natives.arity(id)?;
        Some(self.emit(Instruction::CallNative { id, argc }))
    }

    /// Create a forward jump-style instruction, returns a label to patch later
    ///
    /// Works for every instruction with a target operand (jumps, forks,
    /// calls, closures).
    pub fn emit_jump(&mut self, instruction: Instruction) -> JumpLabel {
        debug_assert!(instruction.target().is_some());
        let pc = self.emit(instruction);
        JumpLabel { pc }
    }

    /// Patch a jump label to jump to the current position
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        self.patch_jump_to(label, target);
    }

    /// Patch a jump label to an explicit target
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        if let Some(slot) = self.code.get_mut(label.pc).and_then(Instruction::target_mut) {
            *slot = target;
        }
    }

    /// Build the program
    pub fn build(mut self) -> Program {
        self.code_infos.sort_by_key(|info| info.pc);
        Program {
            code: self.code,
            code_infos: self.code_infos,
            line_info: self.line_info,
            name: self.name,
            natives: Arc::new(self.natives),
        }
    }

    /// Build the program and wrap in Arc
    pub fn build_arc(self) -> Arc<Program> {
        Arc::new(self.build())
    }

    fn emit_line_info(&mut self) {
        let Some(line) = self.current_line else {
            return;
        };
        if self.line_info.last().map_or(true, |&(_, l)| l != line) {
            self.line_info.push((self.code.len(), line));
        }
    }
}
