use crate::util::pitch_parser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Note-based pitch editor for monophonic vocals.")]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode and analyse an audio file, writing the feature cache
    Analyze {
        input: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
        /// Ignore and do not write the analysis cache
        #[arg(long)]
        no_cache: bool,
    },
    /// List the notes of an audio file or project document
    Notes {
        input: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Apply pitch edits, resynthesize and save the project
    Edit(EditArgs),
    /// Full resynthesis of an audio file or project document to WAV
    Render {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Set {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        dashed_original_pitch_line: Option<bool>,
    },
}

#[derive(Args, Clone)]
pub struct ModelArgs {
    /// Directory holding the ONNX models, defaults to `models/` next to the executable
    #[arg(long)]
    pub models_dir: Option<PathBuf>,
    /// Use the built-in harmonic vocoder instead of the neural one
    #[arg(long)]
    pub harmonic: bool,
}

#[derive(Args)]
pub struct EditArgs {
    /// Audio file or project document
    pub input: PathBuf,
    /// Project document to write
    #[arg(short, long)]
    pub output: PathBuf,
    /// Shift a note, `INDEX:SEMITONES`
    #[arg(long = "shift", value_parser = note_shift_parser)]
    pub shifts: Vec<NoteShift>,
    /// Move a note onto a pitch, `INDEX:PITCH` (`A3`, `C#4`, `57`)
    #[arg(long = "to-pitch", value_parser = note_pitch_parser)]
    pub to_pitch: Vec<NotePitch>,
    /// Round these notes' offsets to whole semitones
    #[arg(long = "snap")]
    pub snap: Vec<usize>,
    /// Vibrato on a note, `INDEX:RATE_HZ:DEPTH_SEMITONES[:PHASE]`
    #[arg(long = "vibrato", value_parser = vibrato_parser)]
    pub vibrato: Vec<NoteVibrato>,
    /// Global pitch offset in semitones
    #[arg(long)]
    pub global: Option<f64>,
    /// Restore the detected contour before drawing
    #[arg(long)]
    pub reset_f0: bool,
    /// Freehand F0 stroke, `FRAME:HZ,FRAME:HZ,...`
    #[arg(long = "draw", value_parser = stroke_parser)]
    pub strokes: Vec<Stroke>,
    /// Output gain in dB
    #[arg(long)]
    pub volume: Option<f64>,
    /// Also export the resynthesized audio
    #[arg(long)]
    pub render: Option<PathBuf>,
    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke(pub Vec<(usize, f32)>);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteShift {
    pub index: usize,
    pub semitones: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotePitch {
    pub index: usize,
    pub midi: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteVibrato {
    pub index: usize,
    pub rate_hz: f64,
    pub depth_semitones: f64,
    pub phase_radians: f64,
}

fn split_index(s: &str) -> Result<(usize, &str), String> {
    let (index, rest) = s.split_once(':').ok_or_else(|| format!("Expected INDEX:VALUE, got {}", s))?;
    let index = index
        .trim()
        .parse()
        .map_err(|_| format!("Invalid note index: {}", index))?;
    Ok((index, rest))
}

fn parse_f64(s: &str) -> Result<f64, String> {
    s.trim().parse().map_err(|_| format!("Invalid number: {}", s))
}

pub fn note_shift_parser(s: &str) -> Result<NoteShift, String> {
    let (index, value) = split_index(s)?;
    Ok(NoteShift {
        index,
        semitones: parse_f64(value)?,
    })
}

pub fn note_pitch_parser(s: &str) -> Result<NotePitch, String> {
    let (index, value) = split_index(s)?;
    Ok(NotePitch {
        index,
        midi: pitch_parser(value)?,
    })
}

pub fn vibrato_parser(s: &str) -> Result<NoteVibrato, String> {
    let (index, rest) = split_index(s)?;
    let values = rest.split(':').map(parse_f64).collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [rate, depth] => Ok(NoteVibrato {
            index,
            rate_hz: *rate,
            depth_semitones: *depth,
            phase_radians: 0.0,
        }),
        [rate, depth, phase] => Ok(NoteVibrato {
            index,
            rate_hz: *rate,
            depth_semitones: *depth,
            phase_radians: *phase,
        }),
        _ => Err(format!("Expected INDEX:RATE:DEPTH[:PHASE], got {}", s)),
    }
}

pub fn stroke_parser(s: &str) -> Result<Stroke, String> {
    s.split(',')
        .map(|point| {
            let (frame, hz) = split_index(point)?;
            let hz: f32 = hz.trim().parse().map_err(|_| format!("Invalid frequency: {}", hz))?;
            Ok((frame, hz))
        })
        .collect::<Result<Vec<_>, String>>()
        .map(Stroke)
}
