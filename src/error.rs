//! Error types for the editing core

use crate::project::NoteId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditorError {
    /// No audio has been loaded into the project
    #[error("No project loaded")]
    NoProject,

    /// Mel spectrogram or F0 missing
    #[error("No mel spectrogram or F0 data, load an audio file first")]
    MissingFeatures,

    /// Vocoder model is not loaded
    #[error("Vocoder model not loaded")]
    VocoderNotLoaded,

    /// Vocoder returned an empty sample buffer
    #[error("Synthesis failed: empty output from vocoder")]
    EmptySynthesis,

    /// Vocoder frames do not line up with the analysis frames
    #[error("Vocoder hop size {vocoder} does not match the project hop size {grid}")]
    HopMismatch { vocoder: usize, grid: usize },

    #[error("Unknown note: {0}")]
    UnknownNote(NoteId),

    /// Note span is empty, past the contour or overlaps another note
    #[error("Invalid note span [{0}, {1})")]
    InvalidNoteSpan(usize, usize),

    #[error("Invalid project document: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EditorResult<T> = Result<T, EditorError>;
