//! KDL project documents.
//!
//! ```kdl
//! project version=1 name="take" audio-path="take.wav" sample-rate=44100 global-pitch-offset=0.0 formant-shift=0.0 volume=0.0
//! note start-frame=12 end-frame=80 midi-note=57.021 pitch-offset=2.0 vibrato-enabled=false vibrato-rate-hz=5.5 vibrato-depth-semitones=0.5 vibrato-phase-radians=0.0
//! f0 "0.000000 220.125000 ..."
//! original-f0 "..."
//! voiced-mask "0110"
//! original-voiced-mask "0110"
//! ```

use super::note::Vibrato;
use super::Project;
use anyhow::{bail, Context, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use knuffel::Decode;
use log::info;
use std::path::{Path, PathBuf};

pub const DOCUMENT_VERSION: i64 = 1;
pub const EXTENSION: &str = "tsp";

#[derive(Decode, Debug)]
struct ProjectDocument {
    #[knuffel(child)]
    project: HeaderNode,
    #[knuffel(children(name = "note"))]
    notes: Vec<NoteNode>,
    #[knuffel(child, unwrap(argument))]
    f0: String,
    #[knuffel(child, unwrap(argument))]
    original_f0: Option<String>,
    #[knuffel(child, unwrap(argument))]
    voiced_mask: String,
    #[knuffel(child, unwrap(argument))]
    original_voiced_mask: Option<String>,
}

#[derive(Decode, Debug)]
struct HeaderNode {
    #[knuffel(property)]
    version: i64,
    #[knuffel(property)]
    name: Option<String>,
    #[knuffel(property)]
    audio_path: Option<String>,
    #[knuffel(property)]
    sample_rate: Option<u32>,
    #[knuffel(property)]
    global_pitch_offset: Option<f64>,
    #[knuffel(property)]
    formant_shift: Option<f64>,
    #[knuffel(property)]
    volume: Option<f64>,
}

#[derive(Decode, Debug)]
struct NoteNode {
    #[knuffel(property)]
    start_frame: u64,
    #[knuffel(property)]
    end_frame: u64,
    #[knuffel(property)]
    midi_note: f64,
    #[knuffel(property)]
    pitch_offset: Option<f64>,
    #[knuffel(property)]
    vibrato_enabled: Option<bool>,
    #[knuffel(property)]
    vibrato_rate_hz: Option<f64>,
    #[knuffel(property)]
    vibrato_depth_semitones: Option<f64>,
    #[knuffel(property)]
    vibrato_phase_radians: Option<f64>,
}

/// Note fields as stored; ids are assigned on restore.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    pub start_frame: usize,
    pub end_frame: usize,
    pub midi_note: f32,
    pub pitch_offset: f64,
    pub vibrato: Vibrato,
}

/// Everything a document holds, before features are re-attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSnapshot {
    pub version: i64,
    pub name: String,
    pub audio_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub global_pitch_offset: f64,
    pub formant_shift: f64,
    pub volume: f64,
    pub notes: Vec<NoteRecord>,
    pub f0: Vec<f32>,
    pub original_f0: Option<Vec<f32>>,
    pub voiced: Vec<bool>,
    pub original_voiced: Option<Vec<bool>>,
}

pub fn parse(text: &str) -> Result<ProjectSnapshot> {
    let doc: ProjectDocument = knuffel::parse("project.kdl", text)?;
    if doc.project.version > DOCUMENT_VERSION {
        bail!("Project version {} is newer than supported {}", doc.project.version, DOCUMENT_VERSION);
    }

    let notes = doc
        .notes
        .into_iter()
        .map(|n| NoteRecord {
            start_frame: n.start_frame as usize,
            end_frame: n.end_frame as usize,
            midi_note: n.midi_note as f32,
            pitch_offset: n.pitch_offset.unwrap_or(0.0),
            vibrato: Vibrato {
                enabled: n.vibrato_enabled.unwrap_or(false),
                rate_hz: n.vibrato_rate_hz.unwrap_or(0.0),
                depth_semitones: n.vibrato_depth_semitones.unwrap_or(0.0),
                phase_radians: n.vibrato_phase_radians.unwrap_or(0.0),
            },
        })
        .collect();

    Ok(ProjectSnapshot {
        version: doc.project.version,
        name: doc.project.name.unwrap_or_else(|| "Untitled".to_string()),
        audio_path: doc.project.audio_path.map(PathBuf::from),
        sample_rate: doc.project.sample_rate.unwrap_or(crate::util::SAMPLE_RATE),
        global_pitch_offset: doc.project.global_pitch_offset.unwrap_or(0.0),
        formant_shift: doc.project.formant_shift.unwrap_or(0.0),
        volume: doc.project.volume.unwrap_or(0.0),
        notes,
        f0: parse_f0(&doc.f0).context("Invalid f0 array")?,
        original_f0: doc.original_f0.as_deref().map(parse_f0).transpose().context("Invalid original-f0 array")?,
        voiced: parse_mask(&doc.voiced_mask).context("Invalid voiced-mask")?,
        original_voiced: doc
            .original_voiced_mask
            .as_deref()
            .map(parse_mask)
            .transpose()
            .context("Invalid original-voiced-mask")?,
    })
}

pub fn to_kdl(project: &Project) -> String {
    let features = &project.features;
    let mut doc = KdlDocument::new();

    let mut header = KdlNode::new("project");
    prop(&mut header, "version", KdlValue::Integer(DOCUMENT_VERSION.into()));
    prop(&mut header, "name", KdlValue::String(project.name.clone()));
    if let Some(path) = &project.audio_path {
        prop(&mut header, "audio-path", KdlValue::String(path.to_string_lossy().into_owned()));
    }
    prop(&mut header, "sample-rate", KdlValue::Integer(features.grid.sample_rate.into()));
    prop(&mut header, "global-pitch-offset", KdlValue::Float(project.global_pitch_offset));
    prop(&mut header, "formant-shift", KdlValue::Float(project.formant_shift));
    prop(&mut header, "volume", KdlValue::Float(project.volume));
    doc.nodes_mut().push(header);

    for note in project.notes() {
        let mut node = KdlNode::new("note");
        prop(&mut node, "start-frame", KdlValue::Integer(note.start_frame as i128));
        prop(&mut node, "end-frame", KdlValue::Integer(note.end_frame as i128));
        prop(&mut node, "midi-note", KdlValue::Float(note.midi_note as f64));
        prop(&mut node, "pitch-offset", KdlValue::Float(note.pitch_offset));
        prop(&mut node, "vibrato-enabled", KdlValue::Bool(note.vibrato.enabled));
        prop(&mut node, "vibrato-rate-hz", KdlValue::Float(note.vibrato.rate_hz));
        prop(&mut node, "vibrato-depth-semitones", KdlValue::Float(note.vibrato.depth_semitones));
        prop(&mut node, "vibrato-phase-radians", KdlValue::Float(note.vibrato.phase_radians));
        doc.nodes_mut().push(node);
    }

    doc.nodes_mut().push(text_node("f0", format_f0(&features.f0)));
    if !features.original_f0.is_empty() {
        doc.nodes_mut().push(text_node("original-f0", format_f0(&features.original_f0)));
    }
    doc.nodes_mut().push(text_node("voiced-mask", format_mask(&features.voiced)));
    if !features.original_voiced.is_empty() {
        doc.nodes_mut().push(text_node("original-voiced-mask", format_mask(&features.original_voiced)));
    }

    doc.autoformat();
    // read back with knuffel, which only speaks KDL v1
    doc.ensure_v1();
    doc.to_string()
}

fn prop(node: &mut KdlNode, key: &str, value: KdlValue) {
    node.entries_mut().push(KdlEntry::new_prop(key, value));
}

fn text_node(name: &str, text: String) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.entries_mut().push(KdlEntry::new(KdlValue::String(text)));
    node
}

pub fn save<P: AsRef<Path>>(project: &Project, path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, to_kdl(project)).with_context(|| format!("Failed to write project {}", path.display()))?;
    info!("Saved project to {}", path.display());
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<ProjectSnapshot> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read project {}", path.display()))?;
    parse(&text).with_context(|| format!("Failed to parse project {}", path.display()))
}

fn format_f0(values: &[f32]) -> String {
    values.iter().map(|v| format!("{:.6}", v)).collect::<Vec<_>>().join(" ")
}

fn format_mask(mask: &[bool]) -> String {
    mask.iter().map(|&v| if v { '1' } else { '0' }).collect()
}

fn parse_f0(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|token| token.parse::<f32>().with_context(|| format!("Bad F0 value '{}'", token)))
        .collect()
}

fn parse_mask(text: &str) -> Result<Vec<bool>> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => bail!("Bad voiced flag '{}'", other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureStore, FrameGrid, MelSpectrogram};

    fn sample_project() -> Project {
        let mut f0 = vec![0.0_f32; 40];
        f0[5..20].fill(220.5);
        f0[25..38].fill(330.25);
        let features = FeatureStore::new(FrameGrid::default(), Vec::new(), MelSpectrogram::default(), f0);
        let mut project = Project::from_features("Take \"one\"", Some(PathBuf::from("/tmp/take.wav")), features);
        project.global_pitch_offset = -1.5;
        project.volume = -3.0;
        project.formant_shift = 0.25;

        let ids: Vec<_> = project.notes().iter().map(|n| n.id).collect();
        project.set_note_pitch_offset(ids[0], 2.0).unwrap();
        project.set_note_vibrato(ids[1], Vibrato::new(5.5, 0.5, 1.0)).unwrap();
        project.write_f0(30, 0.0);
        project
    }

    #[test]
    fn test_document_round_trip() {
        let project = sample_project();
        let text = to_kdl(&project);
        let snapshot = parse(&text).unwrap();

        assert_eq!(snapshot.version, DOCUMENT_VERSION);
        assert_eq!(snapshot.name, "Take \"one\"");
        assert_eq!(snapshot.audio_path, Some(PathBuf::from("/tmp/take.wav")));
        assert_eq!(snapshot.sample_rate, 44100);
        assert_eq!(snapshot.global_pitch_offset, -1.5);
        assert_eq!(snapshot.volume, -3.0);
        assert_eq!(snapshot.formant_shift, 0.25);

        assert_eq!(snapshot.notes.len(), 2);
        assert_eq!((snapshot.notes[0].start_frame, snapshot.notes[0].end_frame), (5, 20));
        assert_eq!(snapshot.notes[0].pitch_offset, 2.0);
        assert!(!snapshot.notes[0].vibrato.enabled);
        assert!(snapshot.notes[1].vibrato.enabled);
        assert_eq!(snapshot.notes[1].vibrato.rate_hz, 5.5);

        assert_eq!(snapshot.f0, project.features.f0);
        assert_eq!(snapshot.voiced, project.features.voiced);
        assert_eq!(snapshot.original_f0.as_deref(), Some(&project.features.original_f0[..]));
        assert!(snapshot.original_voiced.as_ref().unwrap()[30]);
        assert!(!snapshot.voiced[30]);
    }

    #[test]
    fn test_names_with_control_characters_round_trip() {
        let mut project = sample_project();
        project.name = "line\rbreak\ttab \"quoted\" back\\slash\nend".to_string();
        project.audio_path = Some(PathBuf::from("C:\\takes\\vox\tlead.wav"));

        let snapshot = parse(&to_kdl(&project)).unwrap();
        assert_eq!(snapshot.name, project.name);
        assert_eq!(snapshot.audio_path, project.audio_path);
        assert_eq!(snapshot.f0, project.features.f0);
    }

    #[test]
    fn test_restore_rebuilds_project() {
        let project = sample_project();
        let snapshot = parse(&to_kdl(&project)).unwrap();
        let features = FeatureStore::new(FrameGrid::default(), vec![0.0; 40 * 512], MelSpectrogram::default(), vec![0.0; 40]);

        let restored = Project::restore(snapshot, features).unwrap();
        assert_eq!(restored.features.f0, project.features.f0);
        assert_eq!(restored.features.original_f0, project.features.original_f0);
        assert_eq!(restored.notes().len(), 2);
        assert_eq!(restored.notes()[0].pitch_offset, 2.0);
        assert_eq!(restored.notes()[1].vibrato, project.notes()[1].vibrato);
        assert!(!restored.has_dirty());
    }

    #[test]
    fn test_restore_rejects_length_mismatch() {
        let snapshot = parse(&to_kdl(&sample_project())).unwrap();
        let features = FeatureStore::new(FrameGrid::default(), Vec::new(), MelSpectrogram::default(), vec![0.0; 12]);
        assert!(Project::restore(snapshot, features).is_err());
    }

    #[test]
    fn test_optional_arrays_may_be_missing() {
        let text = "project version=1 name=\"x\"\nf0 \"0.000000 100.000000\"\nvoiced-mask \"01\"\n";
        let snapshot = parse(text).unwrap();
        assert_eq!(snapshot.f0, vec![0.0, 100.0]);
        assert_eq!(snapshot.voiced, vec![false, true]);
        assert!(snapshot.original_f0.is_none());
        assert!(snapshot.notes.is_empty());
    }

    #[test]
    fn test_bad_mask_is_rejected() {
        let text = "project version=1\nf0 \"1.0\"\nvoiced-mask \"2\"\n";
        assert!(parse(text).is_err());
        let newer = "project version=9\nf0 \"\"\nvoiced-mask \"\"\n";
        assert!(parse(newer).is_err());
    }
}
