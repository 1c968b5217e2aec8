use super::note::{Note, NoteId};
use crate::util::hz_to_midi;
use log::debug;

/// Splits the voiced regions of a contour into notes.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    /// Shorter voiced runs are dropped.
    pub min_frames: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self { min_frames: 5 }
    }
}

impl Segmenter {
    pub fn segment(&self, f0: &[f32], voiced: &[bool], mut next_id: impl FnMut() -> NoteId) -> Vec<Note> {
        let len = f0.len().min(voiced.len());
        let mut notes = Vec::new();
        let mut start = None;

        for i in 0..=len {
            let is_voiced = i < len && voiced[i] && f0[i] > 0.0;
            match (start, is_voiced) {
                (None, true) => start = Some(i),
                (Some(s), false) => {
                    if i - s >= self.min_frames {
                        notes.push(make_note(next_id(), s, i, &f0[s..i]));
                    }
                    start = None;
                }
                _ => {}
            }
        }

        debug!("Segmented {} notes from {} frames", notes.len(), len);
        notes
    }
}

fn make_note(id: NoteId, start: usize, end: usize, f0: &[f32]) -> Note {
    let mean = f0.iter().map(|&f| f as f64).sum::<f64>() / f0.len() as f64;
    let mut note = Note::new(id, start, end, hz_to_midi(mean as f32));
    note.f0_values = f0.to_vec();
    note
}
