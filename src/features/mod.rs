//! Feature extraction: raw captures to fixed-length feature vectors
//!
//! Two independent pipelines share one contract:
//! - `SignatureExtractor`: Haar-like features over a cropped, resized stroke
//!   raster plus aspect ratio and connected-region count (20 values)
//! - `FaceExtractor`: detector descriptor projected through a fixed PCA
//!   transform (32 values)
//!
//! Extraction is deterministic for identical raster input.

mod face;
mod signature;

pub use face::{FaceDetection, FaceDetector, FaceExtractor, PcaProjection, MIN_LANDMARKS};
#[cfg(test)]
pub(crate) use face::tests as face_fixtures;
pub use signature::{
    aspect_ratio, connected_components, haar_features, IntegralImage, SignatureExtractor,
    CANONICAL_SIZE, INK_THRESHOLD,
};

use crate::sample::{FeatureVector, Modality, Point2, Sample, ShapeError};

/// Extraction failures; all are recoverable by discarding the capture
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no face detected in capture")]
    NoFaceDetected,

    #[error("detector returned {found} landmarks, at least {required} are needed")]
    UnusableLandmarks { found: usize, required: usize },

    #[error("augmented variant has no foreground left")]
    EmptyForegroundAfterAugmentation,

    #[error("descriptor has {actual} values, projection expects {expected}")]
    DescriptorDimension { expected: usize, actual: usize },

    #[error("extractor handles {expected} samples, got {actual}")]
    ModalityMismatch { expected: Modality, actual: Modality },

    #[error("extracted features contain non-finite values")]
    NonFinite,

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Everything extraction learns about one capture
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub features: FeatureVector,
    /// Similarity descriptor for the duplicate guard
    pub descriptor: Option<Vec<f64>>,
    /// Landmarks for pose normalisation, when the modality has them
    pub landmarks: Option<Vec<Point2>>,
}

/// A pure function from a sample to its features
pub trait FeatureExtractor: Send + Sync {
    fn modality(&self) -> Modality;

    fn analyze(&self, sample: &Sample) -> Result<Extraction, ExtractionError>;

    fn extract(&self, sample: &Sample) -> Result<FeatureVector, ExtractionError> {
        self.analyze(sample).map(|e| e.features)
    }
}

fn check_modality(expected: Modality, sample: &Sample) -> Result<(), ExtractionError> {
    if sample.modality != expected {
        return Err(ExtractionError::ModalityMismatch {
            expected,
            actual: sample.modality,
        });
    }
    Ok(())
}

fn finish(modality: Modality, values: Vec<f64>) -> Result<FeatureVector, ExtractionError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ExtractionError::NonFinite);
    }
    Ok(FeatureVector::new(modality, values)?)
}
