//! Path tracking for the bytecode VM.
//!
//! `pathbegin` records the current value as the baseline of a path
//! expression. While a path is open, navigation natives (see
//! [`PathRole`]) and `each` append one step per navigation, each step
//! holding the component used and the value reached. `pathend` checks that
//! the expression's result is the value the last step reached and replaces
//! it with the array of components.

use tracing::debug;

use super::env::Env;
use super::types::{PathEntry, Step, VmError, VmResult};
use crate::bytecode::native_registry::PathRole;
use crate::models::Value;

impl Env {
    #[inline]
    pub(super) fn tracking_paths(&self) -> bool {
        !self.paths.is_empty()
    }

    pub(super) fn op_path_begin(&mut self) -> VmResult<Step> {
        let value = self.peek()?.clone().into_value()?;
        let begin = self.paths.push(PathEntry::Begin {
            value,
            outer: self.path_depth,
        });
        self.path_depth = Some(begin);
        Ok(Step::Next)
    }

    pub(super) fn op_path_end(&mut self) -> VmResult<Step> {
        let begin = self.path_depth.ok_or(VmError::StackUnderflow)?;
        let value = self.pop_value()?;
        let reached = self.paths.top().map(PathEntry::value);
        if reached != Some(&value) {
            debug!(target: "filtervm::vm::path", pc = self.pc, value = %value.preview(), "path end mismatch");
            return Err(VmError::InvalidPath { value });
        }

        let components: Vec<Value> = self
            .paths
            .collect_since(begin)
            .into_iter()
            .filter_map(|entry| match entry {
                PathEntry::Step { component, .. } => Some(component.clone()),
                PathEntry::Begin { .. } => None,
            })
            .collect();

        self.paths.set_cursor(Some(begin));
        self.path_depth = match self.paths.pop() {
            Some(PathEntry::Begin { outer, .. }) => outer,
            _ => return Err(VmError::StackUnderflow),
        };
        self.push_value(Value::array(components));
        Ok(Step::Next)
    }

    /// Record the step taken by a navigation native
    ///
    /// The navigated argument must be the value the path has reached so far;
    /// anything else means the expression computed a value rather than
    /// navigating to one.
    pub(super) fn record_native_step(
        &mut self,
        role: PathRole,
        args: &[Value],
        output: &Value,
    ) -> VmResult<()> {
        let (Some(subject), Some(component)) = (role.subject(), role.component(args)) else {
            return Ok(());
        };
        let Some(subject) = args.get(subject) else {
            return Ok(());
        };
        if self.paths.top().map(PathEntry::value) != Some(subject) {
            debug!(target: "filtervm::vm::path", pc = self.pc, value = %subject.preview(), "navigation off path");
            return Err(VmError::InvalidPath {
                value: subject.clone(),
            });
        }
        self.paths.push(PathEntry::Step {
            component,
            value: output.clone(),
        });
        Ok(())
    }
}
