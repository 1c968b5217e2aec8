//! Hand-off between the editor's waveform and whatever plays it.

use arc_swap::ArcSwap;
use log::debug;
use std::sync::Arc;

/// Receives waveform updates from the editor thread.
pub trait AudioOutput: Send + Sync {
    /// Swaps in a whole new buffer.
    fn replace_buffer(&self, samples: Arc<[f32]>, sample_rate: u32);

    /// Overwrites `samples.len()` samples starting at `start`.
    fn overlay(&self, start: usize, samples: &[f32]);
}

/// Copy-on-write buffer published through `ArcSwap`. Readers load one
/// snapshot per chunk, so a swap is only ever observed between chunks.
#[derive(Clone)]
pub struct SharedWaveform {
    inner: Arc<ArcSwap<Buffer>>,
}

struct Buffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    generation: u64,
}

impl Default for SharedWaveform {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(Buffer {
                samples: Arc::from(Vec::new()),
                sample_rate: 0,
                generation: 0,
            })),
        }
    }
}

impl SharedWaveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let shared = Self::default();
        shared.replace_buffer(Arc::from(samples), sample_rate);
        shared
    }

    pub fn snapshot(&self) -> Arc<[f32]> {
        Arc::clone(&self.inner.load_full().samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.load().sample_rate
    }

    /// Number of buffer swaps so far.
    pub fn generation(&self) -> u64 {
        self.inner.load().generation
    }

    /// Copies up to `out.len()` samples from `position`, zero-filling past
    /// the end. Returns how many real samples were copied.
    pub fn read_chunk(&self, position: usize, out: &mut [f32]) -> usize {
        let buffer = self.inner.load_full();
        let samples = &buffer.samples;
        let available = samples.len().saturating_sub(position).min(out.len());
        if available > 0 {
            out[..available].copy_from_slice(&samples[position..position + available]);
        }
        out[available..].fill(0.0);
        available
    }
}

impl AudioOutput for SharedWaveform {
    fn replace_buffer(&self, samples: Arc<[f32]>, sample_rate: u32) {
        debug!("Playback buffer replaced: {} samples", samples.len());
        self.inner.rcu(|current| Buffer {
            samples: Arc::clone(&samples),
            sample_rate,
            generation: current.generation + 1,
        });
    }

    fn overlay(&self, start: usize, samples: &[f32]) {
        if start >= self.inner.load().samples.len() || samples.is_empty() {
            return;
        }
        self.inner.rcu(|current| {
            let mut next = current.samples.to_vec();
            let end = (start + samples.len()).min(next.len());
            if start < end {
                next[start..end].copy_from_slice(&samples[..end - start]);
            }
            Buffer {
                samples: Arc::from(next),
                sample_rate: current.sample_rate,
                generation: current.generation + 1,
            }
        });
    }
}
