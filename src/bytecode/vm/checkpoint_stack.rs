//! Persistent stack with O(1) checkpoint and restore.
//!
//! Slots live in a flat buffer and link to the slot below them, so the
//! buffer is an arena of singly linked chains. `top` is the current chain
//! head; `limit` is the highest slot frozen by a checkpoint. Pushes always
//! allocate above both cursors, so a slot reachable from a saved checkpoint
//! is never overwritten while that checkpoint can still be restored.
//! Divergent branches share their common prefix and only grow new slots for
//! their own suffix.

/// Saved cursors of a [`CheckpointStack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    pub top: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    next: Option<usize>,
}

/// Append-mostly stack whose history can be rewound without copying
#[derive(Debug, Clone)]
pub struct CheckpointStack<T> {
    slots: Vec<Slot<T>>,
    top: Option<usize>,
    limit: Option<usize>,
}

impl<T> Default for CheckpointStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CheckpointStack<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            top: None,
            limit: None,
        }
    }

    /// Drop every slot but keep the allocation
    pub fn reset(&mut self) {
        self.slots.clear();
        self.top = None;
        self.limit = None;
    }

    /// Push a value, returning the slot it landed in
    pub fn push(&mut self, value: T) -> usize {
        let slot = Slot {
            value,
            next: self.top,
        };
        // None orders below Some, so this is max(top, limit) + 1 with -1 for empty
        let index = self.top.max(self.limit).map_or(0, |i| i + 1);
        if index < self.slots.len() {
            self.slots[index] = slot;
        } else {
            self.slots.push(slot);
        }
        self.top = Some(index);
        index
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Peek at the current top
    #[inline]
    pub fn top(&self) -> Option<&T> {
        self.top.map(|i| &self.slots[i].value)
    }

    /// Index of the current top slot
    #[inline]
    pub fn cursor(&self) -> Option<usize> {
        self.top
    }

    /// Point the top at another slot of the arena without touching `limit`
    #[inline]
    pub fn set_cursor(&mut self, top: Option<usize>) {
        self.top = top;
    }

    /// Freeze the current chain and return the cursors needed to rewind to it
    pub fn checkpoint(&mut self) -> Checkpoint {
        let saved = Checkpoint {
            top: self.top,
            limit: self.limit,
        };
        if self.top > self.limit {
            self.limit = self.top;
        }
        saved
    }

    /// Rewind to a checkpoint; slots above it become reclaimable
    #[inline]
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.top = checkpoint.top;
        self.limit = checkpoint.limit;
    }

    /// Walk the current chain from the top down
    pub fn iter(&self) -> ChainIter<'_, T> {
        ChainIter {
            slots: &self.slots,
            cursor: self.top,
        }
    }

    /// Number of values on the current chain
    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// Values pushed above slot `base`, oldest first
    ///
    /// `base` itself is not included. If `base` is not on the current chain
    /// the whole chain is returned.
    pub fn collect_since(&self, base: usize) -> Vec<&T> {
        let mut items: Vec<&T> = self
            .iter()
            .take_while(|&(index, _)| index != base)
            .map(|(_, value)| value)
            .collect();
        items.reverse();
        items
    }
}

impl<T: Clone> CheckpointStack<T> {
    /// Pop the top value
    ///
    /// The slot is left in place: a checkpoint taken earlier may still lead
    /// back to it.
    pub fn pop(&mut self) -> Option<T> {
        let index = self.top?;
        let slot = &self.slots[index];
        self.top = slot.next;
        Some(slot.value.clone())
    }
}

/// Iterator over `(slot index, value)` from the top of a chain down
pub struct ChainIter<'a, T> {
    slots: &'a [Slot<T>],
    cursor: Option<usize>,
}

impl<'a, T> Iterator for ChainIter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.slots[index];
        self.cursor = slot.next;
        Some((index, &slot.value))
    }
}
