//! The binding trail: an undo log for variable assignments.
//!
//! Every binding that an older choice point may need to see undone is
//! recorded here as the bound slot's id.  Backtracking pops entries down to
//! a recorded mark and resets each slot to unbound.  Bindings of variables
//! younger than the newest choice point are elided by the binding context
//! (see [`crate::unify::BindCtx`]); those slots are reclaimed wholesale when
//! the arena is truncated, so undoing them individually would be wasted
//! work.

use crate::{Arena, VarId};

/// Position in the trail, recorded by choice points and at query entry.
pub type TrailMark = usize;

#[derive(Debug, Default)]
pub struct Trail {
    entries: Vec<VarId>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `var` was bound and must be reset on backtracking.
    #[inline]
    pub fn push(&mut self, var: VarId) {
        self.entries.push(var);
    }

    /// The current position; bindings recorded after a mark are exactly the
    /// ones undone by `undo_to` with that mark.
    #[inline]
    pub fn mark(&self) -> TrailMark {
        self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unbinds every variable recorded since `mark`, newest first.
    pub fn undo_to(&mut self, arena: &mut Arena, mark: TrailMark) {
        while self.entries.len() > mark {
            if let Some(var) = self.entries.pop() {
                arena.unbind(var);
            }
        }
    }
}
