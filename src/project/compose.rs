use super::note::Note;
use super::FrameRange;
use crate::features::FeatureStore;
use crate::util::semitones_to_ratio;

const RATIO_STEP: f64 = 1e-3;

/// Frames blended around a ratio step at frame `i`: `[i - before, i + after)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingWindow {
    pub before: usize,
    pub after: usize,
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self { before: 2, after: 3 }
    }
}

/// Builds the adjusted F0 the vocoder is driven with.
///
/// Layers, in order: global offset on every voiced frame, then a per-frame
/// ratio from note offsets and vibrato, with ratio steps linearly blended
/// over a short window, applied to voiced frames only.
pub struct PitchComposer<'a> {
    features: &'a FeatureStore,
    notes: &'a [Note],
    global_offset: f64,
    window: SmoothingWindow,
}

impl<'a> PitchComposer<'a> {
    pub fn new(features: &'a FeatureStore, notes: &'a [Note], global_offset: f64) -> Self {
        Self {
            features,
            notes,
            global_offset,
            window: SmoothingWindow::default(),
        }
    }

    pub fn with_window(mut self, window: SmoothingWindow) -> Self {
        self.window = window;
        self
    }

    pub fn compose_full(&self) -> Vec<f32> {
        self.compose_range(0, self.features.num_frames())
    }

    /// Adjusted F0 over `[start, end)`, clamped to the contour.
    pub fn compose_range(&self, start: usize, end: usize) -> Vec<f32> {
        let scope = FrameRange::new(start, end).clamped(self.features.num_frames());
        if scope.is_empty() {
            return Vec::new();
        }

        let f0 = &self.features.f0[scope.start..scope.end];
        let voiced = &self.features.voiced[scope.start..scope.end];
        let mut adjusted = f0.to_vec();

        if self.global_offset != 0.0 {
            let global = semitones_to_ratio(self.global_offset);
            for value in adjusted.iter_mut().filter(|v| **v > 0.0) {
                *value = (*value as f64 * global) as f32;
            }
        }

        let raw = self.note_ratios(scope);
        let ratio = self.smooth(&raw);

        for ((value, &r), &v) in adjusted.iter_mut().zip(&ratio).zip(voiced) {
            if v {
                *value = (*value as f64 * r) as f32;
            }
        }
        adjusted
    }

    fn note_ratios(&self, scope: FrameRange) -> Vec<f64> {
        let mut ratio = vec![1.0_f64; scope.len()];
        let grid = self.features.grid;

        for note in self.notes.iter().filter(|n| n.modifies_pitch()) {
            if !note.overlaps(scope.start, scope.end) {
                continue;
            }
            let offset = if note.has_offset() { semitones_to_ratio(note.pitch_offset) } else { 1.0 };

            let from = note.start_frame.max(scope.start);
            let to = note.end_frame.min(scope.end);
            for frame in from..to {
                let mut r = offset;
                if note.vibrato.is_active() {
                    let tau = grid.frame_to_seconds((frame - note.start_frame) as f64);
                    r *= semitones_to_ratio(note.vibrato.semitones_at(tau));
                }
                ratio[frame - scope.start] = r;
            }
        }
        ratio
    }

    /// Blends across every step in `raw`. Steps are found on the unsmoothed
    /// ratio and each window is interpolated between unsmoothed endpoints,
    /// so overlapping windows never feed on each other.
    fn smooth(&self, raw: &[f64]) -> Vec<f64> {
        let mut smoothed = raw.to_vec();
        for i in 1..raw.len() {
            if (raw[i] - raw[i - 1]).abs() <= RATIO_STEP {
                continue;
            }
            let lo = i.saturating_sub(self.window.before);
            let hi = (i + self.window.after).min(raw.len());
            if hi <= lo + 1 {
                continue;
            }

            let (first, last) = (raw[lo], raw[hi - 1]);
            let span = (hi - 1 - lo) as f64;
            for (k, slot) in smoothed[lo..hi].iter_mut().enumerate() {
                *slot = first + (last - first) * k as f64 / span;
            }
        }
        smoothed
    }
}
