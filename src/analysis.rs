//! Audio file to project: decode, mel, F0, segmentation.

use crate::audio;
use crate::features::{FeatureStore, FrameGrid, MelExtractor, MelSpectrogram};
use crate::pitch::PitchTracker;
use crate::project::{document, Project};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CachedFeatures {
    version: u32,
    grid: FrameGrid,
    num_samples: usize,
    detector: String,
    mel: MelSpectrogram,
    f0: Vec<f32>,
}

/// `take.wav` -> `take.wav.tsfx`, next to the audio.
pub fn cache_path(audio_path: &Path) -> PathBuf {
    let mut cache = audio_path.to_path_buf();
    let mut name = audio_path.file_name().unwrap_or_default().to_os_string();
    name.push(".tsfx");
    cache.set_file_name(name);
    cache
}

pub struct Analyzer {
    grid: FrameGrid,
    mel: MelExtractor,
    tracker: PitchTracker,
    pub use_cache: bool,
}

impl Analyzer {
    pub fn new(grid: FrameGrid, models_dir: Option<&Path>) -> Self {
        let tracker = match models_dir {
            Some(dir) => PitchTracker::with_models_dir(grid, dir),
            None => PitchTracker::new(grid),
        };
        Self {
            grid,
            mel: MelExtractor::new(grid),
            tracker,
            use_cache: true,
        }
    }

    pub fn grid(&self) -> FrameGrid {
        self.grid
    }

    pub fn analyze_samples(&mut self, samples: Vec<f32>) -> FeatureStore {
        let mel = self.mel.compute(&samples);
        let contour = self.tracker.track(&samples, self.grid.sample_rate, mel.num_frames());
        info!(
            "Analysis complete. Frames: {}, voiced: {}",
            contour.len(),
            contour.voiced.iter().filter(|&&v| v).count()
        );
        FeatureStore::new(self.grid, samples, mel, contour.f0)
    }

    /// Decodes `path` and extracts features, reusing the on-disk cache when
    /// it matches the decoded audio.
    pub fn analyze_file(&mut self, path: &Path) -> Result<FeatureStore> {
        let samples = audio::load_mono(path, self.grid.sample_rate)
            .with_context(|| format!("Failed to load audio from {}", path.display()))?;
        info!("Loaded {} ({} samples)", path.display(), samples.len());

        let cache = cache_path(path);
        if self.use_cache && cache.exists() {
            match read_cache(&cache) {
                Ok(cached) if cached.version == CACHE_VERSION && cached.grid == self.grid && cached.num_samples == samples.len() => {
                    info!("Loading analysis data from {} ({} detector)", cache.display(), cached.detector);
                    return Ok(FeatureStore::new(self.grid, samples, cached.mel, cached.f0));
                }
                Ok(_) => debug!("Analysis cache {} is stale", cache.display()),
                Err(e) => warn!("Ignoring unreadable analysis cache {}: {:#}", cache.display(), e),
            }
        }

        let detector = self.tracker.detector_name().to_string();
        let features = self.analyze_samples(samples);
        if self.use_cache {
            let cached = CachedFeatures {
                version: CACHE_VERSION,
                grid: self.grid,
                num_samples: features.waveform.len(),
                detector,
                mel: (*features.mel).clone(),
                f0: features.original_f0.clone(),
            };
            if let Err(e) = write_cache(&cache, &cached) {
                warn!("Could not write analysis cache {}: {:#}", cache.display(), e);
            }
        }
        Ok(features)
    }

    pub fn open_audio(&mut self, path: &Path) -> Result<Project> {
        let features = self.analyze_file(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        Ok(Project::from_features(name, Some(path.to_path_buf()), features))
    }

    /// Loads a project document and re-attaches the audio it points at.
    /// Relative audio paths resolve against the document's directory.
    pub fn open_project(&mut self, document_path: &Path) -> Result<Project> {
        let snapshot = document::load(document_path)?;
        let audio_path = snapshot
            .audio_path
            .clone()
            .context("Project document has no audio-path")?;
        let audio_path = match document_path.parent() {
            Some(dir) if audio_path.is_relative() => dir.join(audio_path),
            _ => audio_path,
        };

        let features = self.analyze_file(&audio_path)?;
        let mut project = Project::restore(snapshot, features)
            .with_context(|| format!("Failed to restore project {}", document_path.display()))?;
        project.audio_path = Some(audio_path);
        Ok(project)
    }
}

fn read_cache(path: &Path) -> Result<CachedFeatures> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(bincode::deserialize::<CachedFeatures>(&buf)?)
}

fn write_cache(path: &Path, features: &CachedFeatures) -> Result<()> {
    let bin = bincode::serialize(features)?;
    let mut f = File::create(path)?;
    f.write_all(&bin)?;
    Ok(())
}
