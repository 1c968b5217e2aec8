use super::hmm::VoicingHmm;
use super::{PitchContour, PitchDetector};
use crate::features::FrameGrid;
use crate::filter::band_limit_for_pitch;
use anyhow::Result;
use log::{debug, warn};

/// Classical fallback detector: YIN period search on the feature grid,
/// followed by HMM voicing cleanup.
pub struct TimeDomainDetector {
    pub grid: FrameGrid,
    pub fmin: f32,
    pub fmax: f32,
    pub threshold: f32,
    pub window: usize,
    pub silence_rms: f32,
    hmm: VoicingHmm,
}

impl TimeDomainDetector {
    pub fn new(grid: FrameGrid) -> Self {
        Self {
            grid,
            fmin: 60.0,
            fmax: 1000.0,
            threshold: 0.15,
            window: 1024,
            silence_rms: 10.0_f32.powf(-50.0 / 20.0),
            hmm: VoicingHmm::new(),
        }
    }

    fn lag_range(&self, sample_rate: u32) -> (usize, usize) {
        let min_lag = ((sample_rate as f32 / self.fmax).floor() as usize).max(2);
        let max_lag = (sample_rate as f32 / self.fmin).ceil() as usize;
        (min_lag, max_lag)
    }

    /// F0 and voicing on the detector's grid, `ceil(len / hop)` frames.
    pub fn extract_contour(&self, samples: &[f32], sample_rate: u32) -> PitchContour {
        let mut filtered = samples.to_vec();
        if let Err(e) = band_limit_for_pitch(&mut filtered, sample_rate, 50.0, self.fmax) {
            warn!("Pitch pre-filter skipped: {}", e);
            filtered.copy_from_slice(samples);
        }

        let hop = self.grid.hop_size * sample_rate as usize / self.grid.sample_rate as usize;
        let hop = hop.max(1);
        let num_frames = samples.len().div_ceil(hop);
        let (min_lag, max_lag) = self.lag_range(sample_rate);
        let span = self.window + max_lag + 1;

        let mut segment = vec![0.0_f32; span];
        let mut raw = Vec::with_capacity(num_frames);
        for frame in 0..num_frames {
            let start = (frame * hop) as isize - (span / 2) as isize;
            for (j, slot) in segment.iter_mut().enumerate() {
                let idx = start + j as isize;
                *slot = if idx >= 0 && (idx as usize) < filtered.len() {
                    filtered[idx as usize]
                } else {
                    0.0
                };
            }
            raw.push(self.detect_period(&segment, min_lag, max_lag, sample_rate));
        }

        let f0 = self.hmm.smooth_f0(&raw);
        let voiced: Vec<bool> = f0.iter().map(|&f| f > 0.0).collect();
        debug!(
            "Time-domain detector: {} frames, {} voiced",
            f0.len(),
            voiced.iter().filter(|&&v| v).count()
        );
        PitchContour { f0, voiced }
    }

    fn detect_period(&self, segment: &[f32], min_lag: usize, max_lag: usize, sample_rate: u32) -> f32 {
        let w = self.window;
        let head = &segment[..w];
        let tail = &segment[max_lag..max_lag + w];
        if rms(head) < self.silence_rms || rms(tail) < self.silence_rms {
            return 0.0;
        }

        let mut diff = vec![0.0_f32; max_lag + 1];
        for (lag, d) in diff.iter_mut().enumerate().skip(1) {
            *d = (0..w).map(|j| {
                let delta = segment[j] - segment[j + lag];
                delta * delta
            }).sum();
        }

        // cumulative mean normalised difference
        let mut cmnd = vec![1.0_f32; max_lag + 1];
        let mut running = 0.0;
        for lag in 1..=max_lag {
            running += diff[lag];
            cmnd[lag] = if running > 0.0 { diff[lag] * lag as f32 / running } else { 1.0 };
        }

        let mut lag = min_lag;
        while lag <= max_lag {
            if cmnd[lag] < self.threshold {
                while lag < max_lag && cmnd[lag + 1] < cmnd[lag] {
                    lag += 1;
                }
                break;
            }
            lag += 1;
        }
        if lag > max_lag {
            return 0.0;
        }

        let refined = if lag > 1 && lag < max_lag {
            let (a, b, c) = (cmnd[lag - 1], cmnd[lag], cmnd[lag + 1]);
            let denom = a - 2.0 * b + c;
            if denom.abs() > f32::EPSILON {
                lag as f32 + 0.5 * (a - c) / denom
            } else {
                lag as f32
            }
        } else {
            lag as f32
        };

        let f0 = sample_rate as f32 / refined;
        if f0 < self.fmin || f0 > self.fmax {
            0.0
        } else {
            f0
        }
    }
}

impl PitchDetector for TimeDomainDetector {
    fn name(&self) -> &'static str {
        "time-domain"
    }

    fn frame_rate(&self) -> f64 {
        self.grid.frames_per_second()
    }

    fn extract_f0(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        Ok(self.extract_contour(samples, sample_rate).f0)
    }
}

fn rms(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
}
