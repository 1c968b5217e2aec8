use crate::vocoder::{ExecutionDevice, VocoderAdapter};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use knuffel::Decode;
use log::{info, warn};
use std::path::{Path, PathBuf};

#[derive(Decode, Debug, Clone, PartialEq)]
pub struct EditorConfig {
    #[knuffel(child)]
    pub inference: Option<InferenceConfig>,
    #[knuffel(child)]
    pub display: Option<DisplayConfig>,
}

#[derive(Decode, Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    #[knuffel(property)]
    pub device: Option<String>,
    #[knuffel(property)]
    pub threads: Option<u32>,
}

#[derive(Decode, Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    #[knuffel(property)]
    pub dashed_original_pitch_line: Option<bool>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            inference: Some(InferenceConfig {
                device: Some(ExecutionDevice::Cpu.to_string()),
                threads: Some(0),
            }),
            display: Some(DisplayConfig {
                dashed_original_pitch_line: Some(false),
            }),
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "tessitura", "tessitura").context("Could not determine project directories")?;
    Ok(dirs.config_dir().to_path_buf())
}

/// `models/` next to the running executable.
pub fn default_models_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not locate the executable")?;
    let dir = exe.parent().context("Executable has no parent directory")?;
    Ok(dir.join("models"))
}

impl EditorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = knuffel::parse("config.kdl", &content)?;
        Ok(config)
    }

    /// Reads the config, falling back to defaults when the file is absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path).with_context(|| format!("Failed to read config {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_kdl()).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn to_kdl(&self) -> String {
        let mut inference = KdlNode::new("inference");
        inference
            .entries_mut()
            .push(KdlEntry::new_prop("device", KdlValue::String(self.device().to_string())));
        inference
            .entries_mut()
            .push(KdlEntry::new_prop("threads", KdlValue::Integer(self.threads() as i128)));

        let mut display = KdlNode::new("display");
        display.entries_mut().push(KdlEntry::new_prop(
            "dashed-original-pitch-line",
            KdlValue::Bool(self.dashed_original_pitch_line()),
        ));

        let mut doc = KdlDocument::new();
        doc.nodes_mut().push(inference);
        doc.nodes_mut().push(display);
        doc.autoformat();
        doc.ensure_v1();
        doc.to_string()
    }

    /// Unknown device names fall back to CPU.
    pub fn device(&self) -> ExecutionDevice {
        let Some(name) = self.inference.as_ref().and_then(|i| i.device.as_deref()) else {
            return ExecutionDevice::Cpu;
        };
        name.parse().unwrap_or_else(|e| {
            warn!("{}, using CPU", e);
            ExecutionDevice::Cpu
        })
    }

    /// 0 lets the runtime decide.
    pub fn threads(&self) -> usize {
        self.inference.as_ref().and_then(|i| i.threads).unwrap_or(0) as usize
    }

    pub fn dashed_original_pitch_line(&self) -> bool {
        self.display
            .as_ref()
            .and_then(|d| d.dashed_original_pitch_line)
            .unwrap_or(false)
    }

    pub fn set_device(&mut self, device: ExecutionDevice) {
        let threads = self.threads() as u32;
        self.inference = Some(InferenceConfig {
            device: Some(device.to_string()),
            threads: Some(threads),
        });
    }

    pub fn set_threads(&mut self, threads: usize) {
        let device = self.device().to_string();
        self.inference = Some(InferenceConfig {
            device: Some(device),
            threads: Some(threads as u32),
        });
    }

    pub fn set_dashed_original_pitch_line(&mut self, dashed: bool) {
        self.display = Some(DisplayConfig {
            dashed_original_pitch_line: Some(dashed),
        });
    }

    /// Pushes device and thread settings into the vocoder, reloading a
    /// loaded model so they take effect. Fails without waiting while the
    /// vocoder is running inference.
    pub fn apply(&self, vocoder: &mut VocoderAdapter) -> Result<()> {
        vocoder.set_execution_device(self.device())?;
        vocoder.set_num_threads(self.threads())?;
        if vocoder.is_loaded() {
            vocoder.reload()?;
        }
        info!("Inference: device {}, threads {}", self.device(), self.threads());
        Ok(())
    }
}
