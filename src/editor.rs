//! Single-threaded editing session: project, undo journal and the
//! resynthesis coordinator, driven by one event loop.

use crate::audio;
use crate::error::{EditorError, EditorResult};
use crate::history::{EditAction, F0Change, UndoJournal};
use crate::playback::{AudioOutput, SharedWaveform};
use crate::project::{FrameRange, NoteId, Project, Vibrato};
use crate::synth::{Resynthesizer, SynthEvent};
use crate::util::{db_to_gain, lerp};
use crate::vocoder::VocoderAdapter;
use anyhow::Context;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

const SNAP_EPSILON: f64 = 1e-3;

pub struct Editor {
    project: Project,
    journal: UndoJournal,
    synth: Resynthesizer,
    events: UnboundedReceiver<SynthEvent>,
    output: Arc<dyn AudioOutput>,
}

impl Editor {
    pub fn new(project: Project, vocoder: VocoderAdapter) -> Self {
        let output = SharedWaveform::new(project.features.waveform.clone(), project.grid().sample_rate);
        Self::with_output(project, vocoder, Arc::new(output))
    }

    pub fn with_output(project: Project, vocoder: VocoderAdapter, output: Arc<dyn AudioOutput>) -> Self {
        let (synth, events) = Resynthesizer::new(vocoder);
        Self {
            project,
            journal: UndoJournal::default(),
            synth,
            events,
            output,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn journal(&self) -> &UndoJournal {
        &self.journal
    }

    pub fn synth(&self) -> &Resynthesizer {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut Resynthesizer {
        &mut self.synth
    }

    /// Replaces the project. Journal entries and any synthesis still
    /// running refer to the old one and are dropped.
    pub fn set_project(&mut self, project: Project) {
        self.project = project;
        self.journal.clear();
        self.synth.reset();
        self.output
            .replace_buffer(Arc::from(self.project.features.waveform.as_slice()), self.project.grid().sample_rate);
    }

    /// Explicit whole-take synthesis; failures are reported.
    pub fn resynthesize(&mut self) -> EditorResult<()> {
        self.synth.request_full(&self.project).map(|_| ())
    }

    /// Synthesizes whatever is dirty. Quietly does nothing without dirt,
    /// features or a vocoder.
    pub fn resynthesize_incremental(&mut self) {
        self.synth.request_incremental(&self.project);
    }

    pub fn handle_event(&mut self, event: SynthEvent) -> EditorResult<()> {
        match event {
            SynthEvent::Completed { job, samples } => {
                self.synth.complete(&mut self.project, self.output.as_ref(), job, samples)
            }
            SynthEvent::PreviewDue { token } => self.synth.preview_due(&self.project, token).map(|_| ()),
        }
    }

    /// Waits for the next event and handles it. `None` once nothing is
    /// pending.
    pub async fn process_next(&mut self) -> Option<EditorResult<()>> {
        if !self.synth.has_pending_work() {
            return None;
        }
        let event = self.events.recv().await?;
        Some(self.handle_event(event))
    }

    /// Runs the event loop until no job, rerun or preview is outstanding.
    /// Returns the first error, after everything has settled.
    pub async fn settle(&mut self) -> EditorResult<()> {
        let mut first_error = None;
        while let Some(result) = self.process_next().await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn note_offset(&self, id: NoteId) -> EditorResult<f64> {
        self.project
            .note(id)
            .map(|n| n.pitch_offset)
            .ok_or(EditorError::UnknownNote(id))
    }

    /// Sets a note's offset in semitones, journaled.
    pub fn set_note_pitch_offset(&mut self, id: NoteId, offset: f64) -> EditorResult<()> {
        let old = self.project.set_note_pitch_offset(id, offset)?;
        self.journal.push(EditAction::NoteOffsetChange {
            note: id,
            old_offset: old,
            new_offset: offset,
        });
        self.resynthesize_incremental();
        Ok(())
    }

    pub fn shift_note_pitch(&mut self, id: NoteId, semitones: f64) -> EditorResult<()> {
        let current = self.note_offset(id)?;
        self.set_note_pitch_offset(id, current + semitones)
    }

    /// Rounds the offset to whole semitones. Returns whether it moved.
    pub fn snap_note_to_semitone(&mut self, id: NoteId) -> EditorResult<bool> {
        let current = self.note_offset(id)?;
        let snapped = current.round();
        if (snapped - current).abs() <= SNAP_EPSILON {
            return Ok(false);
        }
        self.set_note_pitch_offset(id, snapped)?;
        Ok(true)
    }

    /// Offsets a note so it sounds at MIDI pitch `target`.
    pub fn set_note_to_pitch(&mut self, id: NoteId, target: f64) -> EditorResult<()> {
        let midi = self
            .project
            .note(id)
            .map(|n| n.midi_note as f64)
            .ok_or(EditorError::UnknownNote(id))?;
        self.set_note_pitch_offset(id, target - midi)
    }

    pub fn set_note_vibrato(&mut self, id: NoteId, vibrato: Vibrato) -> EditorResult<()> {
        self.project.set_note_vibrato(id, vibrato)?;
        self.resynthesize_incremental();
        Ok(())
    }

    /// Slider-style global change: applied now, synthesized after the
    /// debounce delay if no newer change arrives.
    pub fn set_global_pitch_offset(&mut self, semitones: f64) {
        self.project.set_global_pitch_offset(semitones);
        let token = self.synth.schedule_preview();
        debug!("Global offset {} semitones, preview token {}", semitones, token);
    }

    /// Applies a freehand stroke of `(frame, Hz)` points. Frames between
    /// consecutive points are interpolated. Returns the number of frames
    /// changed. Points past the end of the contour are clipped.
    pub fn draw_f0(&mut self, points: &[(usize, f32)]) -> usize {
        let frames = self.project.num_frames();
        let mut targets = BTreeMap::new();
        if let [(frame, hz)] = points {
            if *frame < frames {
                targets.insert(*frame, *hz);
            }
        }
        for pair in points.windows(2) {
            let (lo, hi) = if pair[0].0 <= pair[1].0 { (pair[0], pair[1]) } else { (pair[1], pair[0]) };
            if lo.0 >= frames {
                continue;
            }
            let span = (hi.0 - lo.0).max(1) as f32;
            for frame in lo.0..=hi.0.min(frames - 1) {
                targets.insert(frame, lerp(lo.1, hi.1, (frame - lo.0) as f32 / span));
            }
        }

        let mut changes = Vec::new();
        for (frame, hz) in targets {
            if let Some(old) = self.project.write_f0(frame, hz) {
                let new = self.project.features.f0[frame];
                if old != new {
                    changes.push(F0Change { frame, old, new });
                }
            }
        }
        if changes.is_empty() {
            return 0;
        }

        let count = changes.len();
        let action = EditAction::F0Edit { changes };
        if let Some(span) = action.f0_span() {
            self.project.set_f0_dirty_range(span.start, span.end);
        }
        self.journal.push(action);
        self.resynthesize_incremental();
        count
    }

    /// Puts the contour back to what detection produced, as one undoable
    /// edit. Returns the number of frames restored.
    pub fn reset_f0(&mut self) -> usize {
        let features = &self.project.features;
        let changes: Vec<F0Change> = features
            .f0
            .iter()
            .zip(&features.original_f0)
            .enumerate()
            .filter(|(_, (current, original))| current != original)
            .map(|(frame, (&old, &new))| F0Change { frame, old, new })
            .collect();
        if changes.is_empty() {
            return 0;
        }

        self.project.features.reset_f0();
        let count = changes.len();
        let action = EditAction::F0Edit { changes };
        if let Some(span) = action.f0_span() {
            self.project.set_f0_dirty_range(span.start, span.end);
        }
        self.journal.push(action);
        self.resynthesize_incremental();
        count
    }

    fn after_history_step(&mut self, f0_span: Option<FrameRange>) {
        self.project.mark_all_notes_dirty();
        if let Some(span) = f0_span {
            self.project.set_f0_dirty_range(span.start, span.end);
        }
        self.resynthesize_incremental();
    }

    /// Returns the name of the undone action.
    pub fn undo(&mut self) -> Option<&'static str> {
        let (name, span) = self
            .journal
            .undo(&mut self.project)
            .map(|action| (action.name(), action.f0_span()))?;
        self.after_history_step(span);
        Some(name)
    }

    pub fn redo(&mut self) -> Option<&'static str> {
        let (name, span) = self
            .journal
            .redo(&mut self.project)
            .map(|action| (action.name(), action.f0_span()))?;
        self.after_history_step(span);
        Some(name)
    }

    /// Re-derives notes from the current contour. Note ids change, so the
    /// journal is cleared.
    pub fn resegment(&mut self) -> usize {
        self.journal.clear();
        self.project.resegment()
    }

    /// Output gain in dB, used by [`Editor::export_wav`].
    pub fn set_volume(&mut self, db: f64) {
        self.project.volume = db;
    }

    /// Writes the current waveform with the project volume applied.
    pub fn export_wav(&self, path: &Path) -> anyhow::Result<()> {
        let gain = db_to_gain(self.project.volume as f32);
        audio::save_audio(path, &self.project.features.waveform, self.project.grid().sample_rate, gain)
            .with_context(|| format!("Failed to save audio to {}", path.display()))?;
        info!("Exported {} samples to {}", self.project.features.waveform.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureStore, FrameGrid, MelSpectrogram};
    use crate::vocoder::{ExecutionDevice, Vocoder};
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(usize, Vec<f32>)>>>;

    /// Returns a constant buffer and records every call's mel frame count
    /// and F0.
    struct RecordingVocoder {
        calls: Calls,
        value: f32,
    }

    impl Vocoder for RecordingVocoder {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn load(&mut self, _model_path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_loaded(&self) -> bool {
            true
        }
        fn set_execution_device(&mut self, _device: ExecutionDevice) {}
        fn set_num_threads(&mut self, _threads: usize) {}
        fn reload(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn hop_size(&self) -> usize {
            512
        }
        fn infer(&mut self, mel: &MelSpectrogram, f0: &[f32]) -> anyhow::Result<Vec<f32>> {
            self.calls.lock().unwrap().push((mel.num_frames(), f0.to_vec()));
            Ok(vec![self.value; mel.num_frames() * 512])
        }
    }

    fn project(frames: usize) -> Project {
        let mut f0 = vec![220.0_f32; frames];
        f0[frames / 2..frames / 2 + 3].fill(0.0);
        let mel = MelSpectrogram::new(4, vec![0.0; frames * 4]);
        let features = FeatureStore::new(FrameGrid::default(), vec![0.1; frames * 512], mel, f0);
        Project::from_features("test", None, features)
    }

    fn editor(frames: usize) -> (Editor, Calls) {
        let project = project(frames);
        let calls = Calls::default();
        let vocoder = RecordingVocoder {
            calls: Arc::clone(&calls),
            value: 0.5,
        };
        (Editor::new(project, VocoderAdapter::new(Box::new(vocoder))), calls)
    }

    #[tokio::test]
    async fn test_offset_edit_resynthesizes_note_span() {
        let (mut editor, calls) = editor(200);
        let id = editor.project().notes()[0].id;
        let (start, end) = {
            let n = &editor.project().notes()[0];
            (n.start_frame, n.end_frame)
        };

        editor.set_note_pitch_offset(id, 2.0).unwrap();
        editor.settle().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let padded = FrameRange::new(start, end).padded(10, 200);
        assert_eq!(calls[0].0, padded.len());
        assert!(!editor.project().has_dirty());
        assert_eq!(editor.project().features.waveform[(start + 5) * 512], 0.5);
        assert_eq!(editor.journal().undo_name(), Some("Change Pitch Offset"));
    }

    #[tokio::test]
    async fn test_snap_and_set_to_pitch() {
        let (mut editor, _) = editor(200);
        let id = editor.project().notes()[0].id;

        editor.set_note_pitch_offset(id, 1.4).unwrap();
        assert!(editor.snap_note_to_semitone(id).unwrap());
        assert_eq!(editor.project().note(id).unwrap().pitch_offset, 1.0);
        assert!(!editor.snap_note_to_semitone(id).unwrap());

        editor.set_note_to_pitch(id, 69.0).unwrap();
        let note = editor.project().note(id).unwrap();
        assert!((note.effective_midi() - 69.0).abs() < 1e-9);
        assert!(editor.set_note_to_pitch(NoteId(999), 60.0).is_err());
        editor.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_draw_interpolates_and_undoes() {
        let (mut editor, _) = editor(200);
        let before = editor.project().features.f0.clone();

        let changed = editor.draw_f0(&[(10, 100.0), (14, 140.0)]);
        assert_eq!(changed, 5);
        assert_eq!(editor.project().features.f0[12], 120.0);
        assert_eq!(editor.project().dirty_frame_range(), Some(FrameRange::new(10, 15)));
        editor.settle().await.unwrap();
        assert!(!editor.project().has_dirty());

        assert_eq!(editor.undo(), Some("Edit Pitch Curve"));
        assert_eq!(editor.project().features.f0, before);
        editor.settle().await.unwrap();

        assert_eq!(editor.redo(), Some("Edit Pitch Curve"));
        assert_eq!(editor.project().features.f0[14], 140.0);
        editor.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_backwards_stroke_and_unvoicing() {
        let (mut editor, _) = editor(100);
        editor.draw_f0(&[(30, 0.0), (28, 0.0)]);
        assert!(editor.project().features.voiced[27]);
        assert!(!editor.project().features.voiced[28]);
        assert!(!editor.project().features.voiced[30]);

        editor.draw_f0(&[(40, 300.0), (38, 200.0)]);
        assert_eq!(editor.project().features.f0[39], 250.0);
        assert_eq!(editor.draw_f0(&[(500, 100.0)]), 0);
        editor.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_stroke_past_the_end_is_clipped() {
        let (mut editor, _) = editor(100);
        assert_eq!(editor.draw_f0(&[(90, 100.0), (1_000_000_000, 100.0)]), 10);
        assert!((editor.project().features.f0[99] - 100.0).abs() < 1e-3);
        assert_eq!(editor.project().dirty_frame_range(), Some(FrameRange::new(90, 100)));

        assert_eq!(editor.draw_f0(&[(2_000_000_000, 1.0), (1_000_000_000, 5.0)]), 0);
        assert_eq!(editor.project().features.f0[89], 220.0);
        editor.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_global_offset_preview_runs_full_synthesis() {
        let (mut editor, calls) = editor(100);
        editor.set_global_pitch_offset(1.0);
        editor.set_global_pitch_offset(12.0);
        editor.settle().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 100);
        assert_eq!(calls[0].1[0], 440.0);
        assert_eq!(editor.project().features.waveform.len(), 100 * 512);
        assert!(!editor.project().has_dirty());
    }

    #[tokio::test]
    async fn test_reset_restores_detected_contour() {
        let (mut editor, _) = editor(100);
        let detected = editor.project().features.original_f0.clone();
        editor.draw_f0(&[(10, 300.0), (12, 300.0)]);
        editor.draw_f0(&[(60, 0.0)]);

        assert_eq!(editor.reset_f0(), 4);
        assert_eq!(editor.project().features.f0, detected);
        assert!(editor.project().features.voiced[60]);
        assert_eq!(editor.reset_f0(), 0);

        editor.undo();
        assert_eq!(editor.project().features.f0[11], 300.0);
        assert!(!editor.project().features.voiced[60]);
        editor.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_undo_marks_notes_dirty() {
        let (mut editor, _) = editor(200);
        let id = editor.project().notes()[0].id;
        editor.set_note_pitch_offset(id, 3.0).unwrap();
        editor.settle().await.unwrap();

        assert_eq!(editor.undo(), Some("Change Pitch Offset"));
        assert_eq!(editor.project().note(id).unwrap().pitch_offset, 0.0);
        assert_eq!(editor.project().dirty_notes().count(), editor.project().notes().len());
        editor.settle().await.unwrap();
        assert!(!editor.project().has_dirty());
        assert!(editor.journal().can_redo());
    }

    #[tokio::test]
    async fn test_resegment_clears_journal() {
        let (mut editor, _) = editor(200);
        let id = editor.project().notes()[0].id;
        editor.set_note_pitch_offset(id, 1.0).unwrap();
        editor.settle().await.unwrap();

        editor.resegment();
        assert!(!editor.journal().can_undo());
        assert!(editor.project().note(id).is_none());
    }

    #[tokio::test]
    async fn test_export_applies_volume() {
        let (mut editor, _) = editor(20);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        editor.set_volume(-6.0);

        editor.export_wav(&path).unwrap();
        let (samples, rate) = audio::load_audio(&path).unwrap();
        assert_eq!(rate, 44100);
        assert_eq!(samples.len(), 20 * 512);
        assert!((samples[100] - 0.1 * db_to_gain(-6.0)).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_replacing_project_drops_running_synthesis() {
        let (mut editor, _) = editor(200);
        editor.resynthesize().unwrap();
        editor.set_project(project(50));
        editor.settle().await.unwrap();
        assert_eq!(editor.project().features.waveform.len(), 50 * 512);

        // a late result from the old job is dropped if it lands here
        editor.resynthesize().unwrap();
        editor.settle().await.unwrap();
        assert_eq!(editor.project().features.waveform.len(), 50 * 512);
        assert_eq!(editor.project().features.waveform[0], 0.5);
        assert!(!editor.synth().has_pending_work());
    }

    #[tokio::test]
    async fn test_explicit_resynthesis_reports_missing_input() {
        let (mut editor, _) = editor(20);
        editor.set_project(Project::default());
        assert!(matches!(editor.resynthesize(), Err(EditorError::NoProject)));
        editor.resynthesize_incremental();
        assert!(editor.settle().await.is_ok());
    }
}
