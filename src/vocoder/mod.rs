//! Mel + F0 to waveform.

pub mod harmonic;
pub mod neural;

pub use harmonic::HarmonicVocoder;
pub use neural::NeuralVocoder;

use crate::features::MelSpectrogram;
use anyhow::{bail, Result};
use log::{info, warn};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, TryLockError};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionDevice {
    #[default]
    Cpu,
    Cuda,
    DirectMl,
    CoreMl,
    TensorRt,
}

impl ExecutionDevice {
    pub const ALL: [ExecutionDevice; 5] = [
        ExecutionDevice::Cpu,
        ExecutionDevice::Cuda,
        ExecutionDevice::DirectMl,
        ExecutionDevice::CoreMl,
        ExecutionDevice::TensorRt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionDevice::Cpu => "CPU",
            ExecutionDevice::Cuda => "CUDA",
            ExecutionDevice::DirectMl => "DirectML",
            ExecutionDevice::CoreMl => "CoreML",
            ExecutionDevice::TensorRt => "TensorRT",
        }
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown execution device: {}", s))
    }
}

/// A model that turns `(mel[T x M], f0[T])` into roughly `T * hop_size()`
/// samples.
pub trait Vocoder: Send {
    fn name(&self) -> &'static str;
    fn load(&mut self, model_path: &Path) -> Result<()>;
    fn is_loaded(&self) -> bool;
    fn set_execution_device(&mut self, device: ExecutionDevice);
    fn set_num_threads(&mut self, threads: usize);
    /// Reloads the current model so device and thread changes take effect.
    fn reload(&mut self) -> Result<()>;
    fn hop_size(&self) -> usize;
    fn infer(&mut self, mel: &MelSpectrogram, f0: &[f32]) -> Result<Vec<f32>>;
}

/// Owns the vocoder behind a lock so inference can run on a blocking
/// worker while the editor keeps its own thread. Load state and hop size
/// are mirrored here so the editor never waits on the lock for them.
pub struct VocoderAdapter {
    inner: Arc<Mutex<Box<dyn Vocoder>>>,
    name: &'static str,
    loaded: bool,
    hop_size: usize,
    device: ExecutionDevice,
    threads: usize,
}

impl VocoderAdapter {
    pub fn new(vocoder: Box<dyn Vocoder>) -> Self {
        let name = vocoder.name();
        let loaded = vocoder.is_loaded();
        let hop_size = vocoder.hop_size();
        Self {
            inner: Arc::new(Mutex::new(vocoder)),
            name,
            loaded,
            hop_size,
            device: ExecutionDevice::Cpu,
            threads: 0,
        }
    }

    /// Inference holds the lock for its whole run, so this fails instead
    /// of blocking the editor thread until it finishes.
    fn with_inner<T>(&self, f: impl FnOnce(&mut dyn Vocoder) -> T) -> Result<T> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                bail!("Vocoder '{}' is busy with inference, try again once it finishes", self.name)
            }
            Err(TryLockError::Poisoned(_)) => bail!("Vocoder lock poisoned"),
        };
        Ok(f(guard.as_mut()))
    }

    fn refresh(&mut self) -> Result<()> {
        let (loaded, hop_size) = self.with_inner(|v| (v.is_loaded(), v.hop_size()))?;
        self.loaded = loaded;
        self.hop_size = hop_size;
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn load(&mut self, model_path: &Path) -> Result<()> {
        let result = self.with_inner(|v| v.load(model_path))?;
        self.refresh()?;
        result?;
        info!("Vocoder '{}' loaded from {}", self.name, model_path.display());
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn execution_device(&self) -> ExecutionDevice {
        self.device
    }

    pub fn num_threads(&self) -> usize {
        self.threads
    }

    pub fn set_execution_device(&mut self, device: ExecutionDevice) -> Result<()> {
        self.with_inner(|v| v.set_execution_device(device))?;
        self.device = device;
        Ok(())
    }

    pub fn set_num_threads(&mut self, threads: usize) -> Result<()> {
        self.with_inner(|v| v.set_num_threads(threads))?;
        self.threads = threads;
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        let result = self.with_inner(|v| v.reload())?;
        self.refresh()?;
        result
    }

    /// Runs inference on a blocking worker and hands the samples to
    /// `completion` there. An empty buffer means inference failed.
    pub fn infer_async<F>(&self, mel: MelSpectrogram, f0: Vec<f32>, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Vec<f32>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let samples = match inner.lock() {
                Ok(mut vocoder) => vocoder.infer(&mel, &f0).unwrap_or_else(|e| {
                    warn!("Vocoder inference failed: {:#}", e);
                    Vec::new()
                }),
                Err(_) => {
                    warn!("Vocoder lock poisoned, dropping inference");
                    Vec::new()
                }
            };
            completion(samples);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Cpu));
        assert_eq!("DirectML".parse::<ExecutionDevice>(), Ok(ExecutionDevice::DirectMl));
        assert_eq!(" tensorrt ".parse::<ExecutionDevice>(), Ok(ExecutionDevice::TensorRt));
        assert!("tpu".parse::<ExecutionDevice>().is_err());
        for device in ExecutionDevice::ALL {
            assert_eq!(device.to_string().parse::<ExecutionDevice>(), Ok(device));
        }
    }

    #[tokio::test]
    async fn test_infer_async_delivers_samples() {
        let adapter = VocoderAdapter::new(Box::new(HarmonicVocoder::new()));
        assert!(adapter.is_loaded());
        assert_eq!(adapter.hop_size(), 512);

        let mel = MelSpectrogram::new(4, vec![0.0; 4 * 6]);
        let (tx, rx) = tokio::sync::oneshot::channel();
        adapter
            .infer_async(mel, vec![220.0; 6], move |samples| {
                let _ = tx.send(samples);
            })
            .await
            .unwrap();
        let samples = rx.await.unwrap();
        assert_eq!(samples.len(), 6 * 512);
    }

    #[tokio::test]
    async fn test_failed_inference_yields_empty_buffer() {
        let adapter = VocoderAdapter::new(Box::new(NeuralVocoder::new()));
        assert!(!adapter.is_loaded());

        let (tx, rx) = tokio::sync::oneshot::channel();
        adapter
            .infer_async(MelSpectrogram::new(4, vec![0.0; 8]), vec![0.0; 2], move |samples| {
                let _ = tx.send(samples);
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_empty());
    }

    #[test]
    fn test_settings_are_mirrored() {
        let mut adapter = VocoderAdapter::new(Box::new(NeuralVocoder::new()));
        adapter.set_execution_device(ExecutionDevice::Cuda).unwrap();
        adapter.set_num_threads(4).unwrap();
        assert_eq!(adapter.execution_device(), ExecutionDevice::Cuda);
        assert_eq!(adapter.num_threads(), 4);
        assert!(adapter.load(Path::new("/nonexistent/vocoder.onnx")).is_err());
        assert!(!adapter.is_loaded());
    }

    #[test]
    fn test_settings_fail_while_inference_holds_the_model() {
        let mut adapter = VocoderAdapter::new(Box::new(HarmonicVocoder::new()));
        let inner = Arc::clone(&adapter.inner);
        let guard = inner.lock().unwrap();

        assert!(adapter.set_num_threads(4).is_err());
        assert!(adapter.set_execution_device(ExecutionDevice::Cuda).is_err());
        assert!(adapter.reload().is_err());
        assert_eq!(adapter.num_threads(), 0);
        assert_eq!(adapter.execution_device(), ExecutionDevice::Cpu);

        drop(guard);
        adapter.set_num_threads(4).unwrap();
        assert_eq!(adapter.num_threads(), 4);
    }
}
