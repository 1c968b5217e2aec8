use super::{FrameGrid, MelSpectrogram};
use crate::util::{FMAX, FMIN, NUM_MELS, N_FFT, WIN_SIZE};
use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

const LOG_FLOOR: f32 = 1e-5;

/// Slaney-style mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if hz < min_log_hz {
        hz / f_sp
    } else {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4_f32.ln() / 27.0;
    if mel < min_log_mel {
        mel * f_sp
    } else {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    }
}

/// Triangular, area-normalised filters: `[n_mels][n_fft / 2 + 1]`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let num_bins = n_fft / 2 + 1;
    let fmax = fmax.min(sample_rate as f32 / 2.0);
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz: Vec<f32> = (0..num_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (hi - lo);
            bin_hz
                .iter()
                .map(|&f| {
                    let rising = (f - lo) / (center - lo);
                    let falling = (hi - f) / (hi - center);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Log-magnitude mel spectrogram on the editor's frame grid.
///
/// Frame `i` is centred on sample `i * hop`; the signal is zero-padded at
/// both ends, so a buffer of `N` samples yields `ceil(N / hop)` frames.
pub struct MelExtractor {
    grid: FrameGrid,
    n_fft: usize,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl MelExtractor {
    pub fn new(grid: FrameGrid) -> Self {
        Self::with_params(grid, N_FFT, WIN_SIZE, NUM_MELS, FMIN, FMAX)
    }

    pub fn with_params(grid: FrameGrid, n_fft: usize, win_size: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let win_size = win_size.min(n_fft);
        let window: Vec<f32> = (0..win_size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / win_size as f32).cos()))
            .collect();
        let filterbank = mel_filterbank(grid.sample_rate, n_fft, n_mels, fmin, fmax);
        let fft = FftPlanner::new().plan_fft_forward(n_fft);

        Self {
            grid,
            n_fft,
            window,
            filterbank,
            fft,
        }
    }

    pub fn num_bands(&self) -> usize {
        self.filterbank.len()
    }

    pub fn filterbank(&self) -> &[Vec<f32>] {
        &self.filterbank
    }

    pub fn compute(&self, samples: &[f32]) -> MelSpectrogram {
        let num_frames = self.grid.frames_for_samples(samples.len());
        let n_mels = self.filterbank.len();
        let num_bins = self.n_fft / 2 + 1;
        let half_win = self.window.len() as isize / 2;

        let mut data = Vec::with_capacity(num_frames * n_mels);
        let mut buffer = vec![Complex::new(0.0_f32, 0.0); self.n_fft];
        let mut magnitude = vec![0.0_f32; num_bins];

        for frame in 0..num_frames {
            let center = self.grid.frame_to_sample(frame) as isize;
            buffer.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            for (j, &w) in self.window.iter().enumerate() {
                let idx = center - half_win + j as isize;
                if idx >= 0 && (idx as usize) < samples.len() {
                    buffer[j].re = samples[idx as usize] * w;
                }
            }

            self.fft.process(&mut buffer);
            for (k, mag) in magnitude.iter_mut().enumerate() {
                *mag = buffer[k].norm();
            }

            for filter in &self.filterbank {
                let energy: f32 = filter.iter().zip(&magnitude).map(|(w, m)| w * m).sum();
                data.push(energy.max(LOG_FLOOR).ln());
            }
        }

        debug!("Mel spectrogram: {} frames x {} bands", num_frames, n_mels);
        MelSpectrogram::new(n_mels, data)
    }
}
