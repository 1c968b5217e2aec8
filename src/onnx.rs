//! Thin wrapper over tract for the ONNX models the editor runs.

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// One f32 input tensor: shape plus row-major data.
pub struct Input {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Input {
    pub fn new(shape: &[usize], data: Vec<f32>) -> Self {
        Self {
            shape: shape.to_vec(),
            data,
        }
    }
}

pub struct OnnxModel {
    plan: OnnxPlan,
    path: PathBuf,
}

impl OnnxModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Model not found: {}", path.display());
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .with_context(|| format!("Failed to load ONNX model {}", path.display()))?;

        info!("Loaded ONNX model {}", path.display());
        Ok(Self {
            plan,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the model and returns every output flattened to f32.
    pub fn run(&self, inputs: Vec<Input>) -> Result<Vec<Vec<f32>>> {
        let values: TVec<TValue> = inputs
            .into_iter()
            .map(|input| Tensor::from_shape(&input.shape, &input.data).map(TValue::from))
            .collect::<TractResult<_>>()?;

        let outputs = self
            .plan
            .run(values)
            .with_context(|| format!("Inference failed for {}", self.path.display()))?;

        outputs
            .iter()
            .map(|output| Ok(output.as_slice::<f32>()?.to_vec()))
            .collect()
    }
}

/// Reads a raw little-endian f32 table.
pub fn read_f32_table<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read table {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("Table {} is not a whole number of f32 values", path.display());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
