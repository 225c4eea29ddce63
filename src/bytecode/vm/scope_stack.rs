//! Lexical scope chain.
//!
//! A [`CheckpointStack`] of [`Scope`] records plus lookup by scope identity.
//! Closures hold a cursor into this stack, so the chain walked by a lookup
//! is the one that was live where the closure was created, not the caller's.

use super::checkpoint_stack::{Checkpoint, CheckpointStack};
use super::types::{CallSite, Scope};
use crate::bytecode::opcodes::ScopeId;

#[derive(Debug, Default)]
pub struct ScopeStack {
    chain: CheckpointStack<Scope>,
}

impl ScopeStack {
    pub fn reset(&mut self) {
        self.chain.reset();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[inline]
    pub fn cursor(&self) -> Option<usize> {
        self.chain.cursor()
    }

    #[inline]
    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.chain.set_cursor(cursor);
    }

    #[inline]
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.chain.checkpoint()
    }

    #[inline]
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.chain.restore(checkpoint);
    }

    /// Nearest live activation of `id` on the current chain
    pub fn lookup(&self, id: ScopeId) -> Option<&Scope> {
        self.chain
            .iter()
            .map(|(_, scope)| scope)
            .find(|scope| scope.id == id)
    }

    /// Push an activation record for `id` with registers starting at `offset`
    ///
    /// When `site.caller` is not the current cursor the call came through a
    /// closure: the current chain is frozen and the closure's chain becomes
    /// current, so the new scope links onto the scopes the closure captured.
    pub fn enter(&mut self, id: ScopeId, offset: usize, site: CallSite) -> Scope {
        let saved = if site.caller == self.chain.cursor() {
            self.chain.cursor()
        } else {
            let frozen = self.chain.checkpoint().top;
            self.chain.set_cursor(site.caller);
            frozen
        };
        let scope = Scope {
            id,
            offset,
            return_pc: site.return_pc,
            saved,
        };
        self.chain.push(scope);
        scope
    }

    /// Remove the innermost activation
    pub fn pop(&mut self) -> Option<Scope> {
        self.chain.pop()
    }
}
