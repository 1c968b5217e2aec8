use std::fmt;

/// Stable identity of a note. Ids are never reused within a project, so
/// journal entries naming a note from an earlier segmentation simply miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const NEGLIGIBLE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vibrato {
    pub enabled: bool,
    pub rate_hz: f64,
    pub depth_semitones: f64,
    pub phase_radians: f64,
}

impl Vibrato {
    pub fn new(rate_hz: f64, depth_semitones: f64, phase_radians: f64) -> Self {
        Self {
            enabled: true,
            rate_hz: rate_hz.max(0.0),
            depth_semitones: depth_semitones.max(0.0),
            phase_radians,
        }
    }

    /// Enabled with a rate and depth that actually move the pitch.
    pub fn is_active(&self) -> bool {
        self.enabled && self.rate_hz > NEGLIGIBLE && self.depth_semitones > NEGLIGIBLE
    }

    /// Deviation in semitones `seconds` after the note starts.
    pub fn semitones_at(&self, seconds: f64) -> f64 {
        self.depth_semitones * (2.0 * std::f64::consts::PI * self.rate_hz * seconds + self.phase_radians).sin()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: NoteId,
    /// First frame, inclusive.
    pub start_frame: usize,
    /// Last frame, exclusive.
    pub end_frame: usize,
    pub midi_note: f32,
    pub pitch_offset: f64,
    pub vibrato: Vibrato,
    pub selected: bool,
    pub dirty: bool,
    /// Project revision at which `dirty` was last set.
    pub dirty_revision: u64,
    /// Detected F0 over the note, kept for display.
    pub f0_values: Vec<f32>,
}

impl Note {
    pub fn new(id: NoteId, start_frame: usize, end_frame: usize, midi_note: f32) -> Self {
        Self {
            id,
            start_frame,
            end_frame,
            midi_note,
            pitch_offset: 0.0,
            vibrato: Vibrato::default(),
            selected: false,
            dirty: false,
            dirty_revision: 0,
            f0_values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn is_empty(&self) -> bool {
        self.end_frame <= self.start_frame
    }

    pub fn contains(&self, frame: usize) -> bool {
        frame >= self.start_frame && frame < self.end_frame
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start_frame < end && start < self.end_frame
    }

    pub fn has_offset(&self) -> bool {
        self.pitch_offset.abs() > NEGLIGIBLE
    }

    /// True when the composer has to touch this note at all.
    pub fn modifies_pitch(&self) -> bool {
        self.has_offset() || self.vibrato.is_active()
    }

    /// Nominal pitch plus the user offset, in MIDI units.
    pub fn effective_midi(&self) -> f64 {
        self.midi_note as f64 + self.pitch_offset
    }

    pub fn start_seconds(&self, hop_size: usize, sample_rate: u32) -> f64 {
        crate::util::frames_to_seconds(self.start_frame as f64, hop_size, sample_rate)
    }

    pub fn duration_seconds(&self, hop_size: usize, sample_rate: u32) -> f64 {
        crate::util::frames_to_seconds(self.len() as f64, hop_size, sample_rate)
    }
}
