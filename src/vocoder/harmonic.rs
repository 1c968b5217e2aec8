use super::{ExecutionDevice, Vocoder};
use crate::features::mel::{hz_to_mel, mel_filterbank, mel_to_hz};
use crate::features::MelSpectrogram;
use crate::util::{FMAX, FMIN, HOP_SIZE, NUM_MELS, N_FFT, SAMPLE_RATE, WIN_SIZE};
use anyhow::{bail, Result};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::path::Path;

const MIN_F0: f32 = 40.0;
const MAX_HARMONICS: usize = 256;

/// Model-free harmonic plus noise vocoder.
///
/// Reads a spectral envelope off each mel frame, sums harmonics of the
/// (interpolated) F0 weighted by it and fills unvoiced frames with noise
/// at the frame's level. Deterministic for a given input.
pub struct HarmonicVocoder {
    sample_rate: u32,
    hop_size: usize,
    /// Centre frequency of each mel band.
    centers: Vec<f64>,
    /// Per-band factor turning a log-mel energy back into sinusoid amplitude.
    gains: Vec<f64>,
    seed: u64,
}

impl Default for HarmonicVocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HarmonicVocoder {
    pub fn new() -> Self {
        Self::with_params(SAMPLE_RATE, HOP_SIZE, NUM_MELS)
    }

    pub fn with_params(sample_rate: u32, hop_size: usize, n_mels: usize) -> Self {
        let filterbank = mel_filterbank(sample_rate, N_FFT, n_mels, FMIN, FMAX);
        let fmax = FMAX.min(sample_rate as f32 / 2.0);
        let (mel_min, mel_max) = (hz_to_mel(FMIN), hz_to_mel(fmax));
        let centers = (1..=n_mels)
            .map(|m| mel_to_hz(mel_min + (mel_max - mel_min) * m as f32 / (n_mels + 1) as f32) as f64)
            .collect();

        // Hann window of WIN_SIZE has a coherent gain of WIN_SIZE / 2; a
        // sinusoid of amplitude A peaks at A * WIN_SIZE / 4 in one bin.
        let peak_scale = WIN_SIZE as f64 / 4.0;
        let gains = filterbank
            .iter()
            .map(|filter| {
                let weight: f32 = filter.iter().sum();
                if weight > 0.0 {
                    1.0 / (weight as f64 * peak_scale)
                } else {
                    0.0
                }
            })
            .collect();

        Self {
            sample_rate,
            hop_size,
            centers,
            gains,
            seed: 0x7e55_17a5,
        }
    }

    fn envelope(&self, frame: &[f32]) -> Vec<f64> {
        frame
            .iter()
            .zip(&self.gains)
            .map(|(&log_energy, &gain)| (log_energy as f64).exp() * gain)
            .collect()
    }

    fn amp_at(&self, envelope: &[f64], freq: f64) -> f64 {
        let n = envelope.len().min(self.centers.len());
        if n == 0 {
            return 0.0;
        }
        if freq <= self.centers[0] {
            return envelope[0];
        }
        if freq >= self.centers[n - 1] {
            return 0.0;
        }
        let hi = self.centers[..n].partition_point(|&c| c < freq);
        let lo = hi - 1;
        let frac = (freq - self.centers[lo]) / (self.centers[hi] - self.centers[lo]);
        envelope[lo] * (1.0 - frac) + envelope[hi] * frac
    }

    pub fn synthesize(&self, mel: &MelSpectrogram, f0: &[f32]) -> Vec<f32> {
        let num_frames = mel.num_frames().min(f0.len());
        let total = num_frames * self.hop_size;
        let mut output = vec![0.0_f32; total];
        let envelopes: Vec<Vec<f64>> = (0..num_frames).map(|i| self.envelope(mel.frame(i))).collect();

        let nyquist = self.sample_rate as f64 / 2.0;
        let mut phase = 0.0_f64;
        for i in 0..num_frames {
            let next = (i + 1).min(num_frames - 1);
            let (f_start, f_end) = (f0[i], f0[next]);
            let out_start = i * self.hop_size;

            if f_start < MIN_F0 {
                let mut rng = StdRng::seed_from_u64(self.seed ^ i as u64);
                let level = rms(&envelopes[i]) * 0.3;
                for sample in &mut output[out_start..out_start + self.hop_size] {
                    *sample = (level * rng.gen_range(-1.0..1.0)) as f32;
                }
                phase = 0.0;
                continue;
            }

            let f_end = if f_end < MIN_F0 { f_start } else { f_end };
            for t in 0..self.hop_size {
                let alpha = t as f64 / self.hop_size as f64;
                let current = f_start as f64 * (1.0 - alpha) + f_end as f64 * alpha;
                phase = (phase + 2.0 * PI * current / self.sample_rate as f64) % (2.0 * PI);

                let harmonics = ((FMAX as f64).min(nyquist) / current).floor() as usize;
                let mut value = 0.0;
                for k in 1..=harmonics.min(MAX_HARMONICS) {
                    let freq = current * k as f64;
                    let amp_s = self.amp_at(&envelopes[i], freq);
                    let amp_e = self.amp_at(&envelopes[next], freq);
                    value += (amp_s * (1.0 - alpha) + amp_e * alpha) * (phase * k as f64).sin();
                }
                output[out_start + t] = value as f32;
            }
        }

        debug!("Harmonic vocoder: {} frames -> {} samples", num_frames, total);
        output
    }
}

impl Vocoder for HarmonicVocoder {
    fn name(&self) -> &'static str {
        "harmonic"
    }

    fn load(&mut self, _model_path: &Path) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn set_execution_device(&mut self, _device: ExecutionDevice) {}

    fn set_num_threads(&mut self, _threads: usize) {}

    fn reload(&mut self) -> Result<()> {
        Ok(())
    }

    fn hop_size(&self) -> usize {
        self.hop_size
    }

    fn infer(&mut self, mel: &MelSpectrogram, f0: &[f32]) -> Result<Vec<f32>> {
        if mel.num_frames() != f0.len() {
            bail!("Mel has {} frames but F0 has {}", mel.num_frames(), f0.len());
        }
        Ok(self.synthesize(mel, f0))
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FrameGrid, MelExtractor};

    fn sine(freq: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect()
    }

    #[test]
    fn test_output_length_follows_frames() {
        let vocoder = HarmonicVocoder::new();
        let mel = MelSpectrogram::new(NUM_MELS, vec![-5.0; NUM_MELS * 10]);
        assert_eq!(vocoder.synthesize(&mel, &[0.0; 10]).len(), 10 * 512);
        assert!(vocoder.synthesize(&MelSpectrogram::default(), &[]).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let vocoder = HarmonicVocoder::new();
        let mel = MelExtractor::new(FrameGrid::default()).compute(&sine(220.0, 8192));
        let f0: Vec<f32> = (0..mel.num_frames()).map(|i| if i % 5 == 0 { 0.0 } else { 220.0 }).collect();
        assert_eq!(vocoder.synthesize(&mel, &f0), vocoder.synthesize(&mel, &f0));
    }

    #[test]
    fn test_voiced_frames_carry_energy() {
        let vocoder = HarmonicVocoder::new();
        let mel = MelExtractor::new(FrameGrid::default()).compute(&sine(220.0, 16384));
        let f0 = vec![220.0; mel.num_frames()];
        let out = vocoder.synthesize(&mel, &f0);
        let middle = &out[8 * 512..16 * 512];
        let energy: f32 = middle.iter().map(|v| v * v).sum::<f32>() / middle.len() as f32;
        assert!(energy > 1e-6, "energy {}", energy);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let mut vocoder = HarmonicVocoder::new();
        let mel = MelSpectrogram::new(NUM_MELS, vec![0.0; NUM_MELS * 3]);
        assert!(vocoder.infer(&mel, &[100.0; 2]).is_err());
    }
}
