//! Header words that must survive forwarding.
//!
//! Installing a forwarding pointer overwrites the mark word. Marks that
//! carry information (a hash code, for instance) are saved here and put
//! back once the object has reached its final address.

use crate::addr::Addr;
use crate::object::{MarkWord, ObjectModel};

/// One worker's stack of saved marks.
#[derive(Debug, Default)]
pub struct PreservedMarks {
    entries: Vec<(Addr, MarkWord)>,
}

impl PreservedMarks {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Save `mark` for `obj` if it cannot be rebuilt from scratch.
    pub fn push_if_necessary(&mut self, obj: Addr, mark: MarkWord) {
        if mark.must_be_preserved() {
            self.entries.push((obj, mark));
        }
    }

    /// Point every entry at its object's forwarding address.
    ///
    /// Must run before any object is copied.
    pub fn adjust_during_full_gc(&mut self, model: &dyn ObjectModel) {
        for (obj, _) in &mut self.entries {
            // SAFETY: entries name live objects that have not moved yet.
            if let Some(dest) = unsafe { model.forwardee(*obj) } {
                *obj = dest;
            }
        }
    }

    /// Write the saved marks back and empty the stack.
    pub fn restore(&mut self, model: &dyn ObjectModel) {
        for (obj, mark) in self.entries.drain(..) {
            // SAFETY: adjusted entries name the objects' final addresses.
            unsafe { model.set_mark_word(obj, mark) };
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
