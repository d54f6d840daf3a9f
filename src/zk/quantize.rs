//! Fixed-point rescaling of trained parameters and inference inputs
//!
//! Scales are tied together so every layer's accumulator lands on a single
//! power of `s1`: layer-1 weights and inputs at `s1` give `s1²`, which is also
//! the layer-1 bias scale; layer-2 weights at `s1` on top of that give `s1³`,
//! the layer-2 bias scale.

use crate::sample::{Architecture, Modality};
use crate::train::TrainedModel;
use serde::{Deserialize, Serialize};

/// Quantized magnitudes must stay below this to fit an `i64` with headroom
const MAX_QUANTIZED: f64 = 4.611_686_018_427_388e18; // 2^62

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuantizeError {
    #[error("scale factor must be at least 1, got {0}")]
    InvalidScale(i64),

    #[error("{tensor}[{index}] is not finite")]
    NonFinite { tensor: &'static str, index: usize },

    #[error("{tensor}[{index}] overflows after scaling")]
    Overflow { tensor: &'static str, index: usize },

    #[error("{modality} model has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        modality: Modality,
        expected: Architecture,
        actual: Architecture,
    },

    #[error("{tensor} has {actual} values, layout expects {expected}")]
    LayoutMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("packed {actual} records, layout defines {expected}")]
    RecordCount { expected: usize, actual: usize },

    #[error("input has {actual} values, model expects {expected}")]
    InputDimension { expected: usize, actual: usize },

    #[error("nothing to commit")]
    EmptyRecords,

    #[error("field serialization failed: {0}")]
    Serialization(String),
}

/// Quantization configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantConfig {
    /// Base scale `s1`
    pub s1: i64,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self { s1: 1024 }
    }
}

/// The four scale factors derived from `s1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleFactors {
    pub w1: i64,
    pub w2: i64,
    pub b1: i64,
    pub b2: i64,
}

impl ScaleFactors {
    pub fn from_base(s1: i64) -> Result<Self, QuantizeError> {
        if s1 < 1 {
            return Err(QuantizeError::InvalidScale(s1));
        }
        let s1_sq = s1.checked_mul(s1).ok_or(QuantizeError::InvalidScale(s1))?;
        let s1_cube = s1.checked_mul(s1_sq).ok_or(QuantizeError::InvalidScale(s1))?;
        Ok(Self {
            w1: s1,
            w2: s1,
            b1: s1_sq,
            b2: s1_cube,
        })
    }

    /// Scale applied to inference inputs
    pub fn input(&self) -> i64 {
        self.w1
    }
}

/// Round `values * scale` to the nearest integer (ties away from zero)
pub fn quantize_slice(
    tensor: &'static str,
    values: impl IntoIterator<Item = f64>,
    scale: i64,
) -> Result<Vec<i64>, QuantizeError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, v)| {
            if !v.is_finite() {
                return Err(QuantizeError::NonFinite { tensor, index });
            }
            let scaled = (v * scale as f64).round();
            if scaled.abs() >= MAX_QUANTIZED {
                return Err(QuantizeError::Overflow { tensor, index });
            }
            Ok(scaled as i64)
        })
        .collect()
}

/// Integer model, weights stored row-major per output neuron
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedModel {
    pub modality: Modality,
    pub scales: ScaleFactors,
    pub architecture: Architecture,
    /// hidden x input
    pub w1: Vec<i64>,
    pub b1: Vec<i64>,
    /// output x hidden
    pub w2: Vec<i64>,
    pub b2: Vec<i64>,
}

fn row_major(m: &nalgebra::DMatrix<f64>) -> Vec<f64> {
    // nalgebra stores column-major; the verifier reads rows
    m.transpose().as_slice().to_vec()
}

impl QuantizedModel {
    pub fn from_model(model: &TrainedModel, scales: ScaleFactors) -> Result<Self, QuantizeError> {
        let expected = model.modality.architecture();
        if !model.matches(&expected) {
            return Err(QuantizeError::ShapeMismatch {
                modality: model.modality,
                expected,
                actual: model.architecture(),
            });
        }
        Ok(Self {
            modality: model.modality,
            scales,
            architecture: expected,
            w1: quantize_slice("w1", row_major(&model.w1), scales.w1)?,
            b1: quantize_slice("b1", model.b1.iter().copied(), scales.b1)?,
            w2: quantize_slice("w2", row_major(&model.w2), scales.w2)?,
            b2: quantize_slice("b2", model.b2.iter().copied(), scales.b2)?,
        })
    }

    /// Row `r` of layer-1 weights
    pub fn w1_row(&self, r: usize) -> &[i64] {
        let n = self.architecture.input;
        &self.w1[r * n..(r + 1) * n]
    }

    pub fn w2_row(&self, r: usize) -> &[i64] {
        let n = self.architecture.hidden;
        &self.w2[r * n..(r + 1) * n]
    }
}
