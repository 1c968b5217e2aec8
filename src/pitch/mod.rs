pub mod hmm;
pub mod neural;
pub mod yin;

pub use neural::NeuralPitchDetector;
pub use yin::TimeDomainDetector;

use crate::features::FrameGrid;
use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;

/// F0 in Hz plus its voicing, one entry per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchContour {
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
}

impl PitchContour {
    pub fn from_f0(f0: Vec<f32>) -> Self {
        let voiced = f0.iter().map(|&f| f > 0.0).collect();
        Self { f0, voiced }
    }

    pub fn len(&self) -> usize {
        self.f0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }
}

pub trait PitchDetector {
    fn name(&self) -> &'static str;

    /// Native output frames per second.
    fn frame_rate(&self) -> f64;

    fn extract_f0(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>>;
}

/// Resamples an F0 track produced at `source_rate` frames per second onto
/// `target_frames` frames of `grid`.
///
/// Between two voiced neighbours the value is interpolated; with only one
/// voiced neighbour it is held; with none the frame is unvoiced.
pub fn align_to_grid(raw: &[f32], source_rate: f64, grid: FrameGrid, target_frames: usize) -> Vec<f32> {
    if raw.is_empty() || source_rate <= 0.0 {
        return vec![0.0; target_frames];
    }

    let last = raw.len() - 1;
    (0..target_frames)
        .map(|i| {
            let pos = (grid.frame_to_seconds(i as f64) * source_rate).max(0.0);
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = (pos - lo as f64).clamp(0.0, 1.0) as f32;

            let (a, b) = (raw[lo], raw[hi]);
            match (a > 0.0, b > 0.0) {
                (true, true) => a + (b - a) * frac,
                (true, false) => a,
                (false, true) => b,
                (false, false) => 0.0,
            }
        })
        .collect()
}

/// Picks the neural detector when its model is installed, otherwise the
/// time-domain one, and always returns a contour on the feature grid.
pub struct PitchTracker {
    grid: FrameGrid,
    neural: Option<NeuralPitchDetector>,
    fallback: TimeDomainDetector,
}

impl PitchTracker {
    pub fn new(grid: FrameGrid) -> Self {
        Self {
            grid,
            neural: None,
            fallback: TimeDomainDetector::new(grid),
        }
    }

    /// Loads the neural detector from `models_dir` if all its files exist.
    pub fn with_models_dir(grid: FrameGrid, models_dir: &Path) -> Self {
        let mut tracker = Self::new(grid);
        if NeuralPitchDetector::is_available(models_dir) {
            match NeuralPitchDetector::load(models_dir) {
                Ok(detector) => tracker.neural = Some(detector),
                Err(e) => warn!("Neural pitch detector unavailable, using time-domain: {:#}", e),
            }
        } else {
            debug!("No neural pitch model in {}", models_dir.display());
        }
        tracker
    }

    pub fn detector_name(&self) -> &'static str {
        match &self.neural {
            Some(detector) => detector.name(),
            None => self.fallback.name(),
        }
    }

    pub fn track(&mut self, samples: &[f32], sample_rate: u32, target_frames: usize) -> PitchContour {
        if let Some(detector) = self.neural.as_mut() {
            let rate = detector.frame_rate();
            match detector.extract_f0(samples, sample_rate) {
                Ok(raw) => {
                    info!("F0 from {} detector: {} frames at {} fps", detector.name(), raw.len(), rate);
                    return PitchContour::from_f0(align_to_grid(&raw, rate, self.grid, target_frames));
                }
                Err(e) => warn!("Neural pitch detection failed, using time-domain: {:#}", e),
            }
        }

        let mut contour = self.fallback.extract_contour(samples, sample_rate);
        contour.f0.resize(target_frames, 0.0);
        contour.voiced.resize(target_frames, false);
        info!("F0 from {} detector: {} frames", self.fallback.name(), contour.len());
        contour
    }
}
