//! Resynthesis coordinator.
//!
//! Jobs run one at a time on the vocoder worker. Their completions, and
//! debounced preview timers, come back as [`SynthEvent`]s that the editor
//! feeds into [`Resynthesizer::complete`] and [`Resynthesizer::preview_due`]
//! on its own thread.

pub mod stitch;

pub use stitch::{stitch, StitchPlan};

use crate::error::{EditorError, EditorResult};
use crate::features::MelSpectrogram;
use crate::playback::AudioOutput;
use crate::project::{FrameRange, Project};
use crate::vocoder::VocoderAdapter;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Frames of context synthesized on each side of a dirty range.
pub const CONTEXT_FRAMES: usize = 10;
pub const CROSSFADE_SAMPLES: usize = 256;
pub const PREVIEW_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Full,
    Range {
        /// Frames handed to the vocoder, context included.
        padded: FrameRange,
        /// Frames whose samples get replaced.
        dirty: FrameRange,
        plan: StitchPlan,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthJob {
    pub id: u64,
    /// Project revision at launch; dirt up to here is covered by this job.
    pub revision: u64,
    /// Coordinator epoch at launch; completions from an older epoch belong
    /// to a project that has since been replaced.
    pub epoch: u64,
    pub kind: JobKind,
}

#[derive(Debug)]
pub enum SynthEvent {
    Completed { job: SynthJob, samples: Vec<f32> },
    PreviewDue { token: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rerun {
    Incremental,
    Full,
}

pub struct Resynthesizer {
    vocoder: VocoderAdapter,
    events: UnboundedSender<SynthEvent>,
    in_flight: Option<u64>,
    rerun: Option<Rerun>,
    next_job_id: u64,
    epoch: u64,
    preview_token: u64,
    preview_pending: bool,
    pub context_frames: usize,
    pub crossfade: usize,
    pub preview_delay: Duration,
}

impl Resynthesizer {
    pub fn new(vocoder: VocoderAdapter) -> (Self, UnboundedReceiver<SynthEvent>) {
        let (events, receiver) = unbounded_channel();
        let synth = Self {
            vocoder,
            events,
            in_flight: None,
            rerun: None,
            next_job_id: 1,
            epoch: 0,
            preview_token: 0,
            preview_pending: false,
            context_frames: CONTEXT_FRAMES,
            crossfade: CROSSFADE_SAMPLES,
            preview_delay: PREVIEW_DELAY,
        };
        (synth, receiver)
    }

    pub fn vocoder(&self) -> &VocoderAdapter {
        &self.vocoder
    }

    pub fn vocoder_mut(&mut self) -> &mut VocoderAdapter {
        &mut self.vocoder
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Something is running, queued or waiting on the debounce timer.
    pub fn has_pending_work(&self) -> bool {
        self.in_flight.is_some() || self.rerun.is_some() || self.preview_pending
    }

    /// Forgets the running job, the queued pass and any pending preview.
    /// Called when the project is replaced; the running job still finishes
    /// on the worker but its result is dropped.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.preview_token += 1;
        if let Some(id) = self.in_flight.take() {
            debug!("Job {} abandoned (epoch {})", id, self.epoch);
        }
        self.rerun = None;
        self.preview_pending = false;
    }

    fn check_ready(&self, project: &Project) -> EditorResult<()> {
        if project.is_empty() || project.features.waveform.is_empty() {
            return Err(EditorError::NoProject);
        }
        if !project.features.has_synthesis_input() {
            return Err(EditorError::MissingFeatures);
        }
        if !self.vocoder.is_loaded() {
            return Err(EditorError::VocoderNotLoaded);
        }
        let grid = project.grid().hop_size;
        if self.vocoder.hop_size() != grid {
            return Err(EditorError::HopMismatch {
                vocoder: self.vocoder.hop_size(),
                grid,
            });
        }
        Ok(())
    }

    fn queue(&mut self, kind: Rerun) {
        self.rerun = Some(match (self.rerun, kind) {
            (Some(Rerun::Full), _) | (_, Rerun::Full) => Rerun::Full,
            _ => Rerun::Incremental,
        });
        debug!("Synthesis busy, queued {:?} pass", self.rerun);
    }

    fn dispatch(&mut self, job: SynthJob, mel: MelSpectrogram, f0: Vec<f32>) -> u64 {
        let id = job.id;
        let events = self.events.clone();
        self.in_flight = Some(id);
        self.vocoder.infer_async(mel, f0, move |samples| {
            let _ = events.send(SynthEvent::Completed { job, samples });
        });
        id
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    /// Whole-take synthesis. Failed preconditions are reported; a busy
    /// worker queues the request. Returns the job id when one was launched.
    pub fn request_full(&mut self, project: &Project) -> EditorResult<Option<u64>> {
        self.check_ready(project)?;
        if self.is_busy() {
            self.queue(Rerun::Full);
            return Ok(None);
        }

        let f0 = project.compose_full();
        let mel = (*project.features.mel).clone();
        let job = SynthJob {
            id: self.next_id(),
            revision: project.revision(),
            epoch: self.epoch,
            kind: JobKind::Full,
        };
        info!("Full resynthesis: {} frames (job {})", f0.len(), job.id);
        Ok(Some(self.dispatch(job, mel, f0)))
    }

    /// Synthesizes the dirty range with context. Quietly does nothing when
    /// there is no dirt or the inputs are missing.
    pub fn request_incremental(&mut self, project: &Project) -> Option<u64> {
        let dirty = project.dirty_frame_range()?;
        match self.check_ready(project) {
            Ok(()) => {}
            Err(e @ EditorError::HopMismatch { .. }) => {
                warn!("Incremental resynthesis skipped: {}", e);
                return None;
            }
            Err(e) => {
                debug!("Incremental resynthesis skipped: {}", e);
                return None;
            }
        }
        if self.is_busy() {
            self.queue(Rerun::Incremental);
            return None;
        }

        let frames = project.num_frames();
        let dirty = dirty.clamped(frames);
        if dirty.is_empty() {
            return None;
        }
        let padded = dirty.padded(self.context_frames, frames);
        let hop = project.grid().hop_size;

        let mel = project.features.mel.slice(padded.start, padded.end);
        let f0 = project.compose_range(padded.start, padded.end);
        let plan = StitchPlan::capture(
            &project.features.waveform,
            dirty.start * hop..dirty.end * hop,
            (dirty.start - padded.start) * hop,
            self.crossfade,
        );
        let job = SynthJob {
            id: self.next_id(),
            revision: project.revision(),
            epoch: self.epoch,
            kind: JobKind::Range { padded, dirty, plan },
        };
        info!("Incremental resynthesis: dirty {} padded {} (job {})", dirty, padded, job.id);
        Some(self.dispatch(job, mel, f0))
    }

    /// Commits a finished job, then launches whatever was queued behind it.
    /// Only a failed full job is an error.
    pub fn complete(
        &mut self,
        project: &mut Project,
        output: &dyn AudioOutput,
        job: SynthJob,
        samples: Vec<f32>,
    ) -> EditorResult<()> {
        if job.epoch != self.epoch {
            debug!("Dropping job {} from epoch {} (now {})", job.id, job.epoch, self.epoch);
            return Ok(());
        }
        if self.in_flight == Some(job.id) {
            self.in_flight = None;
        }

        let result = self.commit(project, output, &job, samples);
        self.launch_queued(project);
        result
    }

    fn commit(&mut self, project: &mut Project, output: &dyn AudioOutput, job: &SynthJob, samples: Vec<f32>) -> EditorResult<()> {
        let sample_rate = project.grid().sample_rate;
        match &job.kind {
            JobKind::Full => {
                if samples.is_empty() {
                    return Err(EditorError::EmptySynthesis);
                }
                info!("Full resynthesis done: {} samples", samples.len());
                project.features.waveform = samples;
                output.replace_buffer(Arc::from(project.features.waveform.as_slice()), sample_rate);
            }
            JobKind::Range { dirty, plan, .. } => {
                if samples.is_empty() {
                    warn!("Incremental resynthesis of {} returned no audio", dirty);
                    return Ok(());
                }
                let written = stitch(&mut project.features.waveform, &samples, plan);
                debug!(
                    "Stitched {} samples at {} (fade {})",
                    written, plan.replace.start, plan.fade
                );
                output.overlay(plan.replace.start, &project.features.waveform[plan.replace.start..plan.replace.start + written]);
            }
        }
        project.clear_dirty_through(job.revision);
        Ok(())
    }

    fn launch_queued(&mut self, project: &Project) {
        match self.rerun.take() {
            Some(Rerun::Full) => {
                if let Err(e) = self.request_full(project) {
                    warn!("Queued full resynthesis dropped: {}", e);
                }
            }
            Some(Rerun::Incremental) => {
                self.request_incremental(project);
            }
            None => {}
        }
    }

    /// Restarts the debounce timer. Only the latest token fires a synthesis.
    pub fn schedule_preview(&mut self) -> u64 {
        self.preview_token += 1;
        self.preview_pending = true;
        let token = self.preview_token;
        let events = self.events.clone();
        let delay = self.preview_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SynthEvent::PreviewDue { token });
        });
        token
    }

    /// Runs the preview if `token` is still the latest one.
    pub fn preview_due(&mut self, project: &Project, token: u64) -> EditorResult<Option<u64>> {
        if token != self.preview_token {
            debug!("Ignoring stale preview token {} (current {})", token, self.preview_token);
            return Ok(None);
        }
        self.preview_pending = false;
        self.request_full(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureStore, FrameGrid, MelSpectrogram};
    use crate::playback::SharedWaveform;
    use crate::vocoder::{HarmonicVocoder, NeuralVocoder};

    fn project(frames: usize) -> Project {
        let waveform = vec![0.25_f32; frames * 512];
        let mel = MelSpectrogram::new(8, vec![-3.0; frames * 8]);
        let features = FeatureStore::new(FrameGrid::default(), waveform, mel, vec![200.0; frames]);
        Project::from_features("test", None, features)
    }

    #[tokio::test]
    async fn test_missing_model_is_reported() {
        let (mut synth, _rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(NeuralVocoder::new())));
        let project = project(40);
        assert!(matches!(synth.request_full(&project), Err(EditorError::VocoderNotLoaded)));
        assert!(synth.request_incremental(&project).is_none());
    }

    #[tokio::test]
    async fn test_empty_project_is_reported() {
        let (mut synth, _rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
        assert!(matches!(synth.request_full(&Project::default()), Err(EditorError::NoProject)));
    }

    #[tokio::test]
    async fn test_incremental_needs_dirt() {
        let (mut synth, _rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
        let project = project(40);
        assert!(synth.request_incremental(&project).is_none());
        assert!(!synth.is_busy());
    }

    #[tokio::test]
    async fn test_second_request_is_queued_then_run() {
        let (mut synth, mut rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
        let output = SharedWaveform::default();
        let mut project = project(60);
        let id = project.notes()[0].id;

        project.set_f0_dirty_range(10, 12);
        assert!(synth.request_incremental(&project).is_some());
        project.set_note_pitch_offset(id, 1.0).unwrap();
        assert!(synth.request_incremental(&project).is_none());
        assert!(synth.has_pending_work());

        let Some(SynthEvent::Completed { job, samples }) = rx.recv().await else {
            panic!("expected a completion");
        };
        synth.complete(&mut project, &output, job, samples).unwrap();
        // the queued pass was launched for the note edited mid-flight
        assert!(synth.is_busy());
        assert!(project.has_dirty());

        let Some(SynthEvent::Completed { job, samples }) = rx.recv().await else {
            panic!("expected a completion");
        };
        synth.complete(&mut project, &output, job, samples).unwrap();
        assert!(!project.has_dirty());
        assert!(!synth.has_pending_work());
    }

    #[tokio::test]
    async fn test_only_latest_preview_token_fires() {
        let (mut synth, mut rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
        let project = project(20);
        let first = synth.schedule_preview();
        let second = synth.schedule_preview();
        assert!(second > first);

        let (mut seen, mut launched) = (0, 0);
        while seen < 2 {
            match rx.recv().await {
                Some(SynthEvent::PreviewDue { token }) => {
                    seen += 1;
                    if synth.preview_due(&project, token).unwrap().is_some() {
                        launched += 1;
                    }
                }
                Some(SynthEvent::Completed { .. }) => {}
                None => panic!("event channel closed"),
            }
        }
        assert_eq!(launched, 1);
        assert!(!synth.has_pending_work() || synth.is_busy());
    }

    #[tokio::test]
    async fn test_vocoder_hop_must_match_grid() {
        let vocoder = HarmonicVocoder::with_params(44100, 256, 8);
        let (mut synth, _rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(vocoder)));
        let mut project = project(60);
        project.set_f0_dirty_range(10, 12);

        assert!(synth.request_incremental(&project).is_none());
        assert!(!synth.is_busy());
        assert!(matches!(
            synth.request_full(&project),
            Err(EditorError::HopMismatch { vocoder: 256, grid: 512 })
        ));
        assert!(project.has_dirty());
    }

    #[tokio::test]
    async fn test_reset_drops_running_job() {
        let (mut synth, mut rx) = Resynthesizer::new(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
        let output = SharedWaveform::default();
        let mut old = project(60);
        old.set_f0_dirty_range(10, 12);
        assert!(synth.request_incremental(&old).is_some());
        old.set_f0_dirty_range(30, 32);
        assert!(synth.request_incremental(&old).is_none());
        synth.schedule_preview();

        synth.reset();
        assert!(!synth.has_pending_work());

        let mut fresh = project(20);
        fresh.set_f0_dirty_range(2, 4);
        let before = fresh.features.waveform.clone();

        // the abandoned job and preview timer still report back
        let (mut completed, mut previews) = (0, 0);
        while completed < 1 || previews < 1 {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Some(SynthEvent::Completed { job, samples }) => {
                    completed += 1;
                    synth.complete(&mut fresh, &output, job, samples).unwrap();
                }
                Some(SynthEvent::PreviewDue { token }) => {
                    previews += 1;
                    assert_eq!(synth.preview_due(&fresh, token).unwrap(), None);
                }
                None => panic!("event channel closed"),
            }
        }

        assert_eq!(fresh.features.waveform, before);
        assert!(fresh.has_dirty());
        assert!(!synth.has_pending_work());
        assert_eq!(output.generation(), 0);
    }
}
