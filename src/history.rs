//! Undo/redo journal over pitch edits.

use crate::project::{FrameRange, NoteId, Project};
use log::debug;
use std::collections::VecDeque;

pub const DEFAULT_MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct F0Change {
    pub frame: usize,
    pub old: f32,
    pub new: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    NoteOffsetChange { note: NoteId, old_offset: f64, new_offset: f64 },
    F0Edit { changes: Vec<F0Change> },
}

impl EditAction {
    pub fn name(&self) -> &'static str {
        match self {
            EditAction::NoteOffsetChange { .. } => "Change Pitch Offset",
            EditAction::F0Edit { .. } => "Edit Pitch Curve",
        }
    }

    pub fn apply(&self, project: &mut Project) {
        match self {
            EditAction::NoteOffsetChange { note, new_offset, .. } => set_offset(project, *note, *new_offset),
            EditAction::F0Edit { changes } => {
                for change in changes {
                    project.write_f0(change.frame, change.new);
                }
            }
        }
    }

    pub fn revert(&self, project: &mut Project) {
        match self {
            EditAction::NoteOffsetChange { note, old_offset, .. } => set_offset(project, *note, *old_offset),
            EditAction::F0Edit { changes } => {
                for change in changes.iter().rev() {
                    project.write_f0(change.frame, change.old);
                }
            }
        }
    }

    /// Frames touched by an F0 edit, `[min, max + 1)`.
    pub fn f0_span(&self) -> Option<FrameRange> {
        match self {
            EditAction::F0Edit { changes } => {
                let min = changes.iter().map(|c| c.frame).min()?;
                let max = changes.iter().map(|c| c.frame).max()?;
                Some(FrameRange::new(min, max + 1))
            }
            EditAction::NoteOffsetChange { .. } => None,
        }
    }
}

// A note from before a re-segmentation is gone; the action is then a no-op.
fn set_offset(project: &mut Project, note: NoteId, offset: f64) {
    if let Err(e) = project.set_note_pitch_offset(note, offset) {
        debug!("Skipping journal entry: {}", e);
    }
}

pub struct UndoJournal {
    undo_stack: VecDeque<EditAction>,
    redo_stack: Vec<EditAction>,
    max_history: usize,
}

impl Default for UndoJournal {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl UndoJournal {
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Records an action that has already been applied.
    pub fn push(&mut self, action: EditAction) {
        self.redo_stack.clear();
        self.undo_stack.push_back(action);
        while self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }
    }

    pub fn undo(&mut self, project: &mut Project) -> Option<&EditAction> {
        let action = self.undo_stack.pop_back()?;
        action.revert(project);
        debug!("Undo: {}", action.name());
        self.redo_stack.push(action);
        self.redo_stack.last()
    }

    pub fn redo(&mut self, project: &mut Project) -> Option<&EditAction> {
        let action = self.redo_stack.pop()?;
        action.apply(project);
        debug!("Redo: {}", action.name());
        self.undo_stack.push_back(action);
        self.undo_stack.back()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_name(&self) -> Option<&'static str> {
        self.undo_stack.back().map(EditAction::name)
    }

    pub fn redo_name(&self) -> Option<&'static str> {
        self.redo_stack.last().map(EditAction::name)
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
