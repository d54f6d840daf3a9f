//! Samples: raw captures and the fixed-length vectors derived from them
//!
//! A `Sample` is one capture (signature stroke raster or face still) tagged with
//! its modality. A `FeatureVector` is the fixed-length numeric summary the
//! classifier consumes; its length is a property of the modality alone.

use crate::raster::Raster;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signature: 18 Haar-like features + aspect ratio + region count
pub const SIGNATURE_FEATURE_DIM: usize = 20;
/// Face: PCA projection of the detector descriptor
pub const FACE_FEATURE_DIM: usize = 32;

/// Which biometric or behavioral input is being enrolled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Signature,
    Face,
}

/// Shape of the single hidden-layer perceptron (input, hidden, output)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub input: usize,
    pub hidden: usize,
    pub output: usize,
}

impl Architecture {
    /// Total number of trainable parameters
    pub fn parameter_count(&self) -> usize {
        self.input * self.hidden + self.hidden + self.hidden * self.output + self.output
    }
}

impl Modality {
    pub fn feature_dim(&self) -> usize {
        match self {
            Modality::Signature => SIGNATURE_FEATURE_DIM,
            Modality::Face => FACE_FEATURE_DIM,
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            Modality::Signature => Architecture { input: 20, hidden: 11, output: 2 },
            Modality::Face => Architecture { input: 32, hidden: 17, output: 2 },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Modality::Signature => "signature",
            Modality::Face => "face",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 2D point in raster pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn centroid(points: &[Point2]) -> Option<Point2> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point2::new(sx / n, sy / n))
    }
}

/// Axis-aligned region in pixel coordinates (inclusive bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Region {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }
}

/// Detector-derived data attached to a face capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorMetadata {
    pub region: Option<Region>,
    /// 68-point landmark list (iBUG ordering)
    pub landmarks: Vec<Point2>,
    pub descriptor: Option<Vec<f64>>,
}

/// One raw capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub modality: Modality,
    pub raster: Raster,
    pub metadata: Option<DetectorMetadata>,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(modality: Modality, raster: Raster) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modality,
            raster,
            metadata: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: DetectorMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Same capture content under a fresh id (used for synthetic variants)
    pub fn derive(&self, raster: Raster) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modality: self.modality,
            raster,
            metadata: None,
            captured_at: self.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{modality} feature vector must have {expected} values, got {actual}")]
pub struct ShapeError {
    pub modality: Modality,
    pub expected: usize,
    pub actual: usize,
}

/// Fixed-length feature vector; the length is checked against the modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    modality: Modality,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(modality: Modality, values: Vec<f64>) -> Result<Self, ShapeError> {
        if values.len() != modality.feature_dim() {
            return Err(ShapeError {
                modality,
                expected: modality.feature_dim(),
                actual: values.len(),
            });
        }
        Ok(Self { modality, values })
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn to_dvector(&self) -> nalgebra::DVector<f64> {
        nalgebra::DVector::from_column_slice(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_per_modality() {
        let sig = Modality::Signature.architecture();
        assert_eq!((sig.input, sig.hidden, sig.output), (20, 11, 2));
        let face = Modality::Face.architecture();
        assert_eq!((face.input, face.hidden, face.output), (32, 17, 2));
        assert_eq!(sig.input, Modality::Signature.feature_dim());
        assert_eq!(face.input, Modality::Face.feature_dim());
        assert_eq!(sig.parameter_count(), 20 * 11 + 11 + 11 * 2 + 2);
    }

    #[test]
    fn test_feature_vector_length_checked() {
        assert!(FeatureVector::new(Modality::Signature, vec![0.0; 20]).is_ok());
        let err = FeatureVector::new(Modality::Face, vec![0.0; 20]).unwrap_err();
        assert_eq!(err.expected, 32);
        assert_eq!(err.actual, 20);
    }

    #[test]
    fn test_centroid() {
        let c = Point2::centroid(&[Point2::new(0.0, 0.0), Point2::new(2.0, 4.0)]).unwrap();
        assert_eq!(c, Point2::new(1.0, 2.0));
        assert!(Point2::centroid(&[]).is_none());
    }

    #[test]
    fn test_modality_serde_name() {
        let json = serde_json::to_string(&Modality::Face).unwrap();
        assert_eq!(json, "\"face\"");
    }
}
