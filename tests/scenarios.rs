use approx::assert_relative_eq;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tessitura::analysis::Analyzer;
use tessitura::editor::Editor;
use tessitura::features::{FeatureStore, FrameGrid, MelSpectrogram};
use tessitura::playback::AudioOutput;
use tessitura::project::{FrameRange, Project};
use tessitura::synth::{JobKind, Resynthesizer, SynthEvent};
use tessitura::vocoder::{ExecutionDevice, Vocoder, VocoderAdapter};

const HOP: usize = 512;
const BANDS: usize = 8;

#[derive(Default)]
struct Recorded {
    mels: Vec<MelSpectrogram>,
    f0s: Vec<Vec<f32>>,
}

/// Answers every request with a constant buffer and keeps the inputs.
struct RecordingVocoder {
    recorded: Arc<Mutex<Recorded>>,
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
        HOP
    }
    fn infer(&mut self, mel: &MelSpectrogram, f0: &[f32]) -> anyhow::Result<Vec<f32>> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.mels.push(mel.clone());
        recorded.f0s.push(f0.to_vec());
        Ok(vec![1.0; mel.num_frames() * HOP])
    }
}

#[derive(Default)]
struct RecordingOutput {
    overlays: Mutex<Vec<(usize, usize)>>,
}

impl AudioOutput for RecordingOutput {
    fn replace_buffer(&self, _samples: Arc<[f32]>, _sample_rate: u32) {}

    fn overlay(&self, start: usize, samples: &[f32]) {
        self.overlays.lock().unwrap().push((start, samples.len()));
    }
}

fn recording_adapter() -> (VocoderAdapter, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let vocoder = RecordingVocoder {
        recorded: Arc::clone(&recorded),
    };
    (VocoderAdapter::new(Box::new(vocoder)), recorded)
}

/// Project over `f0` with a mel whose values encode the frame index.
fn project_from_f0(f0: Vec<f32>) -> Project {
    let frames = f0.len();
    let mel_data = (0..frames * BANDS).map(|i| (i / BANDS) as f32).collect();
    let mel = MelSpectrogram::new(BANDS, mel_data);
    let features = FeatureStore::new(FrameGrid::default(), vec![0.25; frames * HOP], mel, f0);
    Project::from_features("scenario", None, features)
}

fn voiced_runs(frames: usize, runs: &[(usize, usize)]) -> Vec<f32> {
    let mut f0 = vec![0.0_f32; frames];
    for &(start, end) in runs {
        for (i, slot) in f0[start..end].iter_mut().enumerate() {
            *slot = 200.0 + (i % 7) as f32;
        }
    }
    f0
}

#[test]
fn load_and_segment() {
    let sample_rate = 44100;
    let samples: Vec<f32> = (0..sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            if (0.5..0.6).contains(&t) {
                0.0
            } else {
                0.5 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            }
        })
        .collect();

    let mut analyzer = Analyzer::new(FrameGrid::default(), None);
    let features = analyzer.analyze_samples(samples);
    let project = Project::from_features("sine", None, features);

    assert_eq!(project.notes().len(), 2);
    for note in project.notes() {
        assert!((note.midi_note - 57.0).abs() < 0.2, "midi {}", note.midi_note);
    }
}

#[test]
fn global_offset_doubles_voiced_frames() {
    let f0 = voiced_runs(300, &[(10, 60), (100, 250)]);
    let mut project = project_from_f0(f0.clone());
    project.set_global_pitch_offset(12.0);

    let adjusted = project.compose_full();
    for (i, (&a, &f)) in adjusted.iter().zip(&f0).enumerate() {
        if f > 0.0 {
            assert_eq!(a, 2.0 * f, "frame {}", i);
        } else {
            assert_eq!(a, 0.0);
        }
    }
}

#[test]
fn note_offset_scales_its_interior_only() {
    let f0 = voiced_runs(300, &[(20, 90), (100, 200), (210, 300)]);
    let mut project = project_from_f0(f0.clone());
    let id = project
        .notes()
        .iter()
        .find(|n| n.start_frame == 100 && n.end_frame == 200)
        .map(|n| n.id)
        .unwrap();
    project.set_note_pitch_offset(id, 7.0).unwrap();

    let adjusted = project.compose_full();
    let fifth = 2.0_f32.powf(7.0 / 12.0);
    for i in 105..195 {
        assert_relative_eq!(adjusted[i] / f0[i], fifth, max_relative = 1e-5);
    }
    for i in (0..95).filter(|&i| f0[i] > 0.0) {
        assert_eq!(adjusted[i], f0[i]);
    }
}

#[test]
fn dirty_union_spans_notes_and_f0_range() {
    let f0 = voiced_runs(300, &[(50, 80), (200, 230)]);
    let mut project = project_from_f0(f0);
    let ids: Vec<_> = project.notes().iter().map(|n| n.id).collect();
    assert_eq!(ids.len(), 2);

    project.mark_note_dirty(ids[0]).unwrap();
    project.mark_note_dirty(ids[1]).unwrap();
    project.set_f0_dirty_range(150, 160);
    assert_eq!(project.dirty_frame_range(), Some(FrameRange::new(50, 230)));

    project.clear_all_dirty();
    assert!(!project.has_dirty());
    assert_eq!(project.dirty_frame_range(), None);
}

#[tokio::test]
async fn incremental_region_is_padded_and_crossfaded() {
    let mut project = project_from_f0(vec![200.0; 300]);
    let (adapter, recorded) = recording_adapter();
    let (mut synth, mut events) = Resynthesizer::new(adapter);
    let output = RecordingOutput::default();

    project.set_f0_dirty_range(100, 110);
    let expected_f0 = project.compose_range(90, 120);
    let expected_mel = project.features.mel.slice(90, 120);
    assert!(synth.request_incremental(&project).is_some());

    let Some(SynthEvent::Completed { job, samples }) = events.recv().await else {
        panic!("expected a completion");
    };
    match &job.kind {
        JobKind::Range { padded, dirty, plan } => {
            assert_eq!(*padded, FrameRange::new(90, 120));
            assert_eq!(*dirty, FrameRange::new(100, 110));
            assert_eq!(plan.replace, 100 * HOP..110 * HOP);
            assert_eq!(plan.offset, 10 * HOP);
            assert_eq!(plan.fade, 256);
        }
        JobKind::Full => panic!("expected a range job"),
    }
    synth.complete(&mut project, &output, job, samples).unwrap();

    {
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.mels, vec![expected_mel]);
        assert_eq!(recorded.f0s, vec![expected_f0]);
    }
    assert_eq!(*output.overlays.lock().unwrap(), vec![(100 * HOP, 10 * HOP)]);

    let waveform = &project.features.waveform;
    let start = 100 * HOP;
    let end = 110 * HOP;
    assert_eq!(waveform[start - 1], 0.25);
    assert_eq!(waveform[start], 0.25);
    assert_relative_eq!(waveform[start + 128], 0.625);
    assert_eq!(waveform[start + 256], 1.0);
    assert_eq!(waveform[end - 257], 1.0);
    assert!(waveform[end - 1] < 0.26);
    assert_eq!(waveform[end], 0.25);
    assert!(!project.has_dirty());
}

#[tokio::test]
async fn undo_and_redo_restore_f0() {
    let project = project_from_f0(vec![180.0; 600]);
    let (adapter, _) = recording_adapter();
    let mut editor = Editor::new(project, adapter);
    let before = editor.project().features.f0.clone();

    let stroke: Vec<(usize, f32)> = (500..510).map(|i| (i, 300.0 + i as f32)).collect();
    assert_eq!(editor.draw_f0(&stroke), 10);
    let after = editor.project().features.f0.clone();
    assert_eq!(after[505], 805.0);
    editor.settle().await.unwrap();

    assert!(editor.undo().is_some());
    assert_eq!(editor.project().features.f0, before);
    editor.settle().await.unwrap();

    assert!(editor.redo().is_some());
    assert_eq!(editor.project().features.f0, after);
    editor.settle().await.unwrap();
    assert!(!editor.project().has_dirty());
}
