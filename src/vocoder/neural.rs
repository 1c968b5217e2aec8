use super::{ExecutionDevice, Vocoder};
use crate::features::MelSpectrogram;
use crate::onnx::{Input, OnnxModel};
use crate::util::HOP_SIZE;
use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "pc_nsf_hifigan.onnx";

/// NSF-HiFiGAN style vocoder: `mel[1, T, M]` and `f0[1, T]` in,
/// `waveform[1, T * hop]` out.
pub struct NeuralVocoder {
    model: Option<OnnxModel>,
    model_path: Option<PathBuf>,
    device: ExecutionDevice,
    threads: usize,
    hop_size: usize,
}

impl Default for NeuralVocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NeuralVocoder {
    pub fn new() -> Self {
        Self {
            model: None,
            model_path: None,
            device: ExecutionDevice::Cpu,
            threads: 0,
            hop_size: HOP_SIZE,
        }
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }
}

impl Vocoder for NeuralVocoder {
    fn name(&self) -> &'static str {
        "nsf-hifigan"
    }

    fn load(&mut self, model_path: &Path) -> Result<()> {
        if self.device != ExecutionDevice::Cpu {
            warn!("{} execution is not available, running on CPU", self.device);
        }
        self.model = None;
        let model = OnnxModel::load(model_path)?;
        info!(
            "Vocoder model ready ({} threads requested)",
            if self.threads == 0 { "auto".to_string() } else { self.threads.to_string() }
        );
        self.model = Some(model);
        self.model_path = Some(model_path.to_path_buf());
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn set_execution_device(&mut self, device: ExecutionDevice) {
        self.device = device;
    }

    fn set_num_threads(&mut self, threads: usize) {
        self.threads = threads;
    }

    fn reload(&mut self) -> Result<()> {
        match self.model_path.clone() {
            Some(path) => self.load(&path),
            None => Ok(()),
        }
    }

    fn hop_size(&self) -> usize {
        self.hop_size
    }

    fn infer(&mut self, mel: &MelSpectrogram, f0: &[f32]) -> Result<Vec<f32>> {
        let Some(model) = &self.model else {
            bail!("Vocoder model not loaded");
        };
        let frames = mel.num_frames();
        if frames == 0 || frames != f0.len() {
            bail!("Mel has {} frames but F0 has {}", frames, f0.len());
        }

        let inputs = vec![
            Input::new(&[1, frames, mel.num_bands()], mel.as_slice().to_vec()),
            Input::new(&[1, frames], f0.to_vec()),
        ];
        let outputs = model.run(inputs)?;
        let samples = outputs.into_iter().next().unwrap_or_default();
        debug!("Vocoder: {} frames -> {} samples", frames, samples.len());
        Ok(samples)
    }
}
