//! Native call operation for the bytecode VM.
//!
//! Stack: `[argN-1, ..., arg0, input] -> [result]`. The input is popped
//! first, then the arguments in order.

use smallvec::SmallVec;
use tracing::trace;

use super::env::Env;
use super::types::{Step, VmError, VmResult};
use crate::bytecode::chunk::Program;
use crate::bytecode::opcodes::NativeId;
use crate::models::Value;

impl Env {
    pub(super) fn op_call_native(&mut self, program: &Program, id: NativeId, argc: usize) -> VmResult<Step> {
        self.poll_interrupt()?;

        let input = self.pop_value()?;
        let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value()?);
        }

        let natives = program.natives();
        trace!(
            target: "filtervm::vm::native",
            pc = self.pc,
            name = natives.get_name(id).unwrap_or("?"),
            argc,
            "call native"
        );
        let output = natives.call(id, &input, &args).map_err(VmError::from)?;

        if self.tracking_paths() {
            self.record_native_step(natives.path_role(id), &args, &output)?;
        }
        self.push_value(output);
        Ok(Step::Next)
    }

    /// Fail with `Canceled` if the interrupt has tripped
    pub(super) fn poll_interrupt(&mut self) -> VmResult<()> {
        self.ticks = 0;
        match self.interrupt.as_ref().and_then(|i| i.check()) {
            Some(reason) => Err(VmError::Canceled(reason)),
            None => Ok(()),
        }
    }
}
