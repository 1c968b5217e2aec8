//! Per-take analysis data on the shared frame grid.

pub mod mel;

pub use mel::MelExtractor;

use crate::util::{HOP_SIZE, SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Uniform frame grid: frame `i` starts at sample `i * hop_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGrid {
    pub sample_rate: u32,
    pub hop_size: usize,
}

impl Default for FrameGrid {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            hop_size: HOP_SIZE,
        }
    }
}

impl FrameGrid {
    /// `ceil(num_samples / hop_size)`
    pub fn frames_for_samples(&self, num_samples: usize) -> usize {
        num_samples.div_ceil(self.hop_size)
    }

    pub fn frame_to_sample(&self, frame: usize) -> usize {
        frame * self.hop_size
    }

    pub fn frame_to_seconds(&self, frame: f64) -> f64 {
        crate::util::frames_to_seconds(frame, self.hop_size, self.sample_rate)
    }

    pub fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }
}

/// Row-major `[frames x bands]` log-mel energies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MelSpectrogram {
    bands: usize,
    data: Vec<f32>,
}

impl MelSpectrogram {
    pub fn new(bands: usize, data: Vec<f32>) -> Self {
        debug_assert!(bands == 0 || data.len() % bands == 0);
        Self { bands, data }
    }

    pub fn from_frames(bands: usize, frames: &[Vec<f32>]) -> Self {
        let mut data = Vec::with_capacity(frames.len() * bands);
        for frame in frames {
            data.extend(frame.iter().copied().chain(std::iter::repeat(0.0)).take(bands));
        }
        Self { bands, data }
    }

    pub fn num_frames(&self) -> usize {
        if self.bands == 0 {
            0
        } else {
            self.data.len() / self.bands
        }
    }

    pub fn num_bands(&self) -> usize {
        self.bands
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.bands..(index + 1) * self.bands]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Frames `[start, end)`, clamped to the available range.
    pub fn slice(&self, start: usize, end: usize) -> MelSpectrogram {
        let end = end.min(self.num_frames());
        let start = start.min(end);
        MelSpectrogram {
            bands: self.bands,
            data: self.data[start * self.bands..end * self.bands].to_vec(),
        }
    }
}

/// Waveform plus everything extracted from it.
///
/// `f0` and `voiced` are the editable contour; `original_f0` and
/// `original_voiced` are frozen after detection.
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    pub grid: FrameGrid,
    pub waveform: Vec<f32>,
    pub mel: Arc<MelSpectrogram>,
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
    pub original_f0: Vec<f32>,
    pub original_voiced: Vec<bool>,
}

impl FeatureStore {
    pub fn new(grid: FrameGrid, waveform: Vec<f32>, mel: MelSpectrogram, f0: Vec<f32>) -> Self {
        let voiced: Vec<bool> = f0.iter().map(|&f| f > 0.0).collect();
        Self {
            grid,
            waveform,
            mel: Arc::new(mel),
            original_f0: f0.clone(),
            original_voiced: voiced.clone(),
            f0,
            voiced,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.f0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }

    pub fn has_synthesis_input(&self) -> bool {
        !self.mel.is_empty() && !self.f0.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.waveform.len() as f64 / self.grid.sample_rate as f64
    }

    /// Writes one F0 value and keeps the voiced mask in step with it.
    pub fn set_f0(&mut self, frame: usize, hz: f32) {
        if let Some(slot) = self.f0.get_mut(frame) {
            *slot = hz.max(0.0);
            self.voiced[frame] = *slot > 0.0;
        }
    }

    /// Restores the editable contour to the detected one.
    pub fn reset_f0(&mut self) {
        self.f0.clone_from(&self.original_f0);
        self.voiced.clone_from(&self.original_voiced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_frame_count_rounds_up() {
        let grid = FrameGrid::default();
        assert_eq!(grid.frames_for_samples(0), 0);
        assert_eq!(grid.frames_for_samples(1), 1);
        assert_eq!(grid.frames_for_samples(512), 1);
        assert_eq!(grid.frames_for_samples(513), 2);
        assert_eq!(grid.frame_to_sample(100), 51200);
    }

    #[test]
    fn test_mel_slice_is_clamped() {
        let frames: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32; 4]).collect();
        let mel = MelSpectrogram::from_frames(4, &frames);
        assert_eq!(mel.num_frames(), 10);

        let part = mel.slice(3, 6);
        assert_eq!(part.num_frames(), 3);
        assert_eq!(part.frame(0), &[3.0; 4]);
        assert_eq!(part.frame(2), &[5.0; 4]);

        assert_eq!(mel.slice(8, 40).num_frames(), 2);
        assert!(mel.slice(12, 40).is_empty());
    }

    #[test]
    fn test_set_f0_keeps_mask_consistent() {
        let mut store = FeatureStore::new(FrameGrid::default(), vec![], MelSpectrogram::default(), vec![0.0, 220.0, 0.0]);
        assert_eq!(store.voiced, vec![false, true, false]);

        store.set_f0(0, 110.0);
        store.set_f0(1, 0.0);
        store.set_f0(7, 100.0);
        assert_eq!(store.f0, vec![110.0, 0.0, 0.0]);
        assert_eq!(store.voiced, vec![true, false, false]);
        assert_eq!(store.original_f0, vec![0.0, 220.0, 0.0]);

        store.reset_f0();
        assert_eq!(store.voiced, vec![false, true, false]);
    }
}
