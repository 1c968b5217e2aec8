pub mod analysis;
pub mod args;
pub mod audio;
pub mod config;
pub mod editor;
pub mod error;
pub mod features;
pub mod filter;
pub mod history;
pub mod onnx;
pub mod pitch;
pub mod playback;
pub mod project;
pub mod synth;
pub mod util;
pub mod vocoder;
