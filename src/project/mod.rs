//! Editable state of one take: features, notes, global modifiers and dirt.

pub mod compose;
pub mod dirty;
pub mod document;
pub mod note;
pub mod segment;

pub use compose::{PitchComposer, SmoothingWindow};
pub use dirty::{DirtyTracker, FrameRange};
pub use note::{Note, NoteId, Vibrato};
pub use segment::Segmenter;

use crate::error::{EditorError, EditorResult};
use crate::features::{FeatureStore, FrameGrid};
use log::{debug, info};
use std::path::PathBuf;

pub struct Project {
    pub name: String,
    pub audio_path: Option<PathBuf>,
    pub features: FeatureStore,
    /// Semitones applied to every voiced frame.
    pub global_pitch_offset: f64,
    /// Persisted only; the vocoders take no formant control.
    pub formant_shift: f64,
    /// Output gain in dB, applied on export.
    pub volume: f64,
    pub smoothing: SmoothingWindow,
    notes: Vec<Note>,
    dirty: DirtyTracker,
    next_note_id: u64,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            audio_path: None,
            features: FeatureStore::default(),
            global_pitch_offset: 0.0,
            formant_shift: 0.0,
            volume: 0.0,
            smoothing: SmoothingWindow::default(),
            notes: Vec::new(),
            dirty: DirtyTracker::default(),
            next_note_id: 1,
        }
    }
}

impl Project {
    /// Wraps freshly analysed features and segments them into notes.
    pub fn from_features(name: impl Into<String>, audio_path: Option<PathBuf>, features: FeatureStore) -> Self {
        let mut project = Self {
            name: name.into(),
            audio_path,
            features,
            ..Self::default()
        };
        project.resegment();
        project
    }

    pub fn grid(&self) -> FrameGrid {
        self.features.grid
    }

    pub fn num_frames(&self) -> usize {
        self.features.num_frames()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn allocate_id(&mut self) -> NoteId {
        let id = NoteId(self.next_note_id);
        self.next_note_id += 1;
        id
    }

    /// Rebuilds the note layer from the current contour. Every note gets a
    /// fresh id, so anything holding old ids must be invalidated.
    pub fn resegment(&mut self) -> usize {
        let mut next = self.next_note_id;
        let notes = Segmenter::default().segment(&self.features.f0, &self.features.voiced, || {
            let id = NoteId(next);
            next += 1;
            id
        });
        self.next_note_id = next;
        self.notes = notes;
        info!("Project '{}': {} notes over {} frames", self.name, self.notes.len(), self.num_frames());
        self.notes.len()
    }

    /// Inserts a note, keeping the layer ordered and non-overlapping.
    pub fn add_note(&mut self, start_frame: usize, end_frame: usize, midi_note: f32) -> EditorResult<NoteId> {
        if start_frame >= end_frame
            || end_frame > self.num_frames()
            || self.notes.iter().any(|n| n.overlaps(start_frame, end_frame))
        {
            return Err(EditorError::InvalidNoteSpan(start_frame, end_frame));
        }

        let id = self.allocate_id();
        let mut note = Note::new(id, start_frame, end_frame, midi_note);
        note.f0_values = self.features.f0[start_frame..end_frame].to_vec();
        let at = self.notes.partition_point(|n| n.start_frame < start_frame);
        self.notes.insert(at, note);
        Ok(id)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    fn note_mut(&mut self, id: NoteId) -> EditorResult<&mut Note> {
        self.notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(EditorError::UnknownNote(id))
    }

    pub fn note_at_frame(&self, frame: usize) -> Option<&Note> {
        let idx = self.notes.partition_point(|n| n.end_frame <= frame);
        self.notes.get(idx).filter(|n| n.contains(frame))
    }

    pub fn notes_in_range(&self, start: usize, end: usize) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.overlaps(start, end))
    }

    pub fn selected_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.selected)
    }

    pub fn dirty_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.dirty)
    }

    pub fn select_note(&mut self, id: NoteId, additive: bool) -> EditorResult<()> {
        if !additive {
            self.deselect_all();
        }
        self.note_mut(id)?.selected = true;
        Ok(())
    }

    pub fn deselect_all(&mut self) {
        for note in &mut self.notes {
            note.selected = false;
        }
    }

    /// Sets a note's offset and marks it dirty. Returns the previous offset.
    pub fn set_note_pitch_offset(&mut self, id: NoteId, offset: f64) -> EditorResult<f64> {
        let revision = self.dirty.bump();
        let note = self.note_mut(id)?;
        let old = note.pitch_offset;
        note.pitch_offset = offset;
        note.dirty = true;
        note.dirty_revision = revision;
        Ok(old)
    }

    pub fn set_note_vibrato(&mut self, id: NoteId, vibrato: Vibrato) -> EditorResult<Vibrato> {
        let revision = self.dirty.bump();
        let note = self.note_mut(id)?;
        let old = note.vibrato;
        note.vibrato = vibrato;
        note.dirty = true;
        note.dirty_revision = revision;
        Ok(old)
    }

    /// A global change touches every frame.
    pub fn set_global_pitch_offset(&mut self, semitones: f64) {
        self.global_pitch_offset = semitones;
        let frames = self.num_frames();
        self.set_f0_dirty_range(0, frames);
    }

    /// Writes one F0 value, keeping the voiced mask in step. Returns the old
    /// value. Dirtiness is left to the caller, which knows the stroke extent.
    pub fn write_f0(&mut self, frame: usize, hz: f32) -> Option<f32> {
        let old = *self.features.f0.get(frame)?;
        self.features.set_f0(frame, hz);
        Some(old)
    }

    pub fn mark_note_dirty(&mut self, id: NoteId) -> EditorResult<()> {
        let revision = self.dirty.bump();
        let note = self.note_mut(id)?;
        note.dirty = true;
        note.dirty_revision = revision;
        Ok(())
    }

    pub fn mark_all_notes_dirty(&mut self) {
        let revision = self.dirty.bump();
        for note in &mut self.notes {
            note.dirty = true;
            note.dirty_revision = revision;
        }
    }

    /// Widens the free-form F0 dirty range to include `[start, end)`.
    pub fn set_f0_dirty_range(&mut self, start: usize, end: usize) {
        self.dirty.widen_f0(FrameRange::new(start, end));
    }

    /// Union of every dirty note span and the F0 range.
    pub fn dirty_frame_range(&self) -> Option<FrameRange> {
        self.notes
            .iter()
            .filter(|n| n.dirty)
            .map(|n| FrameRange::new(n.start_frame, n.end_frame))
            .chain(self.dirty.f0_range())
            .reduce(FrameRange::union)
    }

    pub fn has_dirty(&self) -> bool {
        self.dirty_frame_range().is_some()
    }

    pub fn revision(&self) -> u64 {
        self.dirty.revision()
    }

    pub fn clear_all_dirty(&mut self) {
        for note in &mut self.notes {
            note.dirty = false;
        }
        self.dirty.clear_f0();
    }

    /// Clears dirt stamped at or before `revision`; later marks survive.
    pub fn clear_dirty_through(&mut self, revision: u64) {
        for note in self.notes.iter_mut().filter(|n| n.dirty_revision <= revision) {
            note.dirty = false;
        }
        self.dirty.clear_f0_through(revision);
        debug!("Dirt cleared through revision {}, remaining {:?}", revision, self.dirty_frame_range());
    }

    pub fn composer(&self) -> PitchComposer<'_> {
        PitchComposer::new(&self.features, &self.notes, self.global_pitch_offset).with_window(self.smoothing)
    }

    pub fn compose_full(&self) -> Vec<f32> {
        self.composer().compose_full()
    }

    pub fn compose_range(&self, start: usize, end: usize) -> Vec<f32> {
        self.composer().compose_range(start, end)
    }

    /// Rebuilds a project from a parsed document plus re-extracted features.
    pub fn restore(snapshot: document::ProjectSnapshot, mut features: FeatureStore) -> EditorResult<Self> {
        let frames = features.num_frames();
        if snapshot.f0.len() != frames || snapshot.voiced.len() != frames {
            return Err(EditorError::Document(format!(
                "contour has {} frames, audio has {}",
                snapshot.f0.len(),
                frames
            )));
        }

        let (f0, voiced) = consistent_contour(snapshot.f0, &snapshot.voiced);
        features.f0 = f0;
        features.voiced = voiced;
        if let (Some(orig_f0), Some(orig_voiced)) = (snapshot.original_f0, snapshot.original_voiced) {
            if orig_f0.len() == frames && orig_voiced.len() == frames {
                let (f0, voiced) = consistent_contour(orig_f0, &orig_voiced);
                features.original_f0 = f0;
                features.original_voiced = voiced;
            }
        }

        let mut project = Self {
            name: snapshot.name,
            audio_path: snapshot.audio_path,
            features,
            global_pitch_offset: snapshot.global_pitch_offset,
            formant_shift: snapshot.formant_shift,
            volume: snapshot.volume,
            ..Self::default()
        };
        for record in snapshot.notes {
            let id = project.add_note(record.start_frame, record.end_frame, record.midi_note)?;
            let note = project.note_mut(id)?;
            note.pitch_offset = record.pitch_offset;
            note.vibrato = record.vibrato;
        }
        Ok(project)
    }
}

fn consistent_contour(mut f0: Vec<f32>, mask: &[bool]) -> (Vec<f32>, Vec<bool>) {
    let voiced: Vec<bool> = f0.iter().zip(mask).map(|(&f, &v)| v && f > 0.0).collect();
    for (value, &v) in f0.iter_mut().zip(&voiced) {
        if !v {
            *value = 0.0;
        }
    }
    (f0, voiced)
}
