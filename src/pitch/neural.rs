use super::PitchDetector;
use crate::audio::resample_linear;
use crate::onnx::{read_f32_table, Input, OnnxModel};
use anyhow::{bail, Result};
use log::{debug, info};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::path::Path;
use std::sync::Arc;

pub const MODEL_FILE: &str = "fcpe.onnx";
pub const FILTERBANK_FILE: &str = "fcpe_mel_filterbank.bin";
pub const CENT_TABLE_FILE: &str = "fcpe_cent_table.bin";

const MODEL_RATE: u32 = 16000;
const MODEL_HOP: usize = 160;
const MODEL_FFT: usize = 1024;
const DECODE_RADIUS: usize = 4;

/// Neural F0 estimator: log-mel at 16 kHz in, per-frame cent-bin
/// probabilities out, decoded to Hz at 100 frames per second.
pub struct NeuralPitchDetector {
    model: OnnxModel,
    filterbank: Vec<f32>,
    n_mels: usize,
    cent_table: Vec<f32>,
    confidence_threshold: f32,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl NeuralPitchDetector {
    pub fn is_available(models_dir: &Path) -> bool {
        [MODEL_FILE, FILTERBANK_FILE, CENT_TABLE_FILE]
            .iter()
            .all(|name| models_dir.join(name).is_file())
    }

    pub fn load(models_dir: &Path) -> Result<Self> {
        let model = OnnxModel::load(models_dir.join(MODEL_FILE))?;
        let filterbank = read_f32_table(models_dir.join(FILTERBANK_FILE))?;
        let cent_table = read_f32_table(models_dir.join(CENT_TABLE_FILE))?;

        let num_bins = MODEL_FFT / 2 + 1;
        if filterbank.is_empty() || filterbank.len() % num_bins != 0 {
            bail!("Mel filterbank has {} values, expected a multiple of {}", filterbank.len(), num_bins);
        }
        if cent_table.is_empty() {
            bail!("Cent table is empty");
        }
        let n_mels = filterbank.len() / num_bins;

        let window = (0..MODEL_FFT)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / MODEL_FFT as f32).cos()))
            .collect();
        let fft = FftPlanner::new().plan_fft_forward(MODEL_FFT);

        info!("Neural pitch detector ready: {} mels, {} cent bins", n_mels, cent_table.len());
        Ok(Self {
            model,
            filterbank,
            n_mels,
            cent_table,
            confidence_threshold: 0.05,
            window,
            fft,
        })
    }

    fn log_mel(&self, samples: &[f32]) -> Vec<f32> {
        let num_frames = samples.len() / MODEL_HOP + 1;
        let num_bins = MODEL_FFT / 2 + 1;
        let half = (MODEL_FFT / 2) as isize;

        let mut out = Vec::with_capacity(num_frames * self.n_mels);
        let mut buffer = vec![Complex::new(0.0_f32, 0.0); MODEL_FFT];
        let mut magnitude = vec![0.0_f32; num_bins];
        for frame in 0..num_frames {
            let center = (frame * MODEL_HOP) as isize;
            for (j, slot) in buffer.iter_mut().enumerate() {
                let idx = center - half + j as isize;
                let x = if idx >= 0 && (idx as usize) < samples.len() { samples[idx as usize] } else { 0.0 };
                *slot = Complex::new(x * self.window[j], 0.0);
            }
            self.fft.process(&mut buffer);
            for (k, m) in magnitude.iter_mut().enumerate() {
                *m = buffer[k].norm();
            }
            for filter in self.filterbank.chunks_exact(num_bins) {
                let energy: f32 = filter.iter().zip(&magnitude).map(|(w, m)| w * m).sum();
                out.push(energy.max(1e-5).ln());
            }
        }
        out
    }

    /// Local weighted average of cents around the most likely bin.
    fn decode_frame(&self, probs: &[f32]) -> f32 {
        let Some((peak, &peak_prob)) = probs.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
            return 0.0;
        };
        if peak_prob < self.confidence_threshold {
            return 0.0;
        }

        let start = peak.saturating_sub(DECODE_RADIUS);
        let end = (peak + DECODE_RADIUS + 1).min(probs.len()).min(self.cent_table.len());
        let (weighted, total) = (start..end).fold((0.0_f32, 0.0_f32), |(w, t), i| {
            (w + probs[i] * self.cent_table[i], t + probs[i])
        });
        if total <= 0.0 {
            return 0.0;
        }
        let cents = weighted / total;
        10.0 * (cents / 1200.0).exp2()
    }
}

impl PitchDetector for NeuralPitchDetector {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn frame_rate(&self) -> f64 {
        MODEL_RATE as f64 / MODEL_HOP as f64
    }

    fn extract_f0(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        let audio = resample_linear(samples, sample_rate, MODEL_RATE);
        let mel = self.log_mel(&audio);
        let frames = mel.len() / self.n_mels;

        let outputs = self.model.run(vec![Input::new(&[1, frames, self.n_mels], mel)])?;
        let Some(probs) = outputs.into_iter().next() else {
            bail!("Pitch model produced no output");
        };
        if frames == 0 || probs.len() % frames != 0 {
            bail!("Pitch model output of {} values does not divide into {} frames", probs.len(), frames);
        }

        let bins = probs.len() / frames;
        let f0: Vec<f32> = probs.chunks_exact(bins).map(|p| self.decode_frame(p)).collect();
        debug!("Neural detector: {} frames at {} fps", f0.len(), self.frame_rate());
        Ok(f0)
    }
}
