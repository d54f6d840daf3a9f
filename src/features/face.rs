//! Face features: detector descriptor projected onto fixed principal components
//!
//! The detector is an external collaborator behind `FaceDetector`. Captures that
//! already carry detector metadata skip detection.

use super::{check_modality, finish, Extraction, ExtractionError, FeatureExtractor};
use crate::raster::Raster;
use crate::sample::{Modality, Point2, Region, Sample, FACE_FEATURE_DIM};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Eye landmarks end at index 47 in the 68-point scheme
pub const MIN_LANDMARKS: usize = 48;

/// What a face detector reports for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub region: Region,
    pub landmarks: Vec<Point2>,
    pub descriptor: Vec<f64>,
}

/// External face detector (landmarks + descriptor network)
pub trait FaceDetector: Send + Sync {
    fn detect(&self, raster: &Raster) -> Option<FaceDetection>;
}

/// Mean-subtract then multiply by a fixed component matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaProjection {
    /// Descriptor mean (length d)
    pub mean: DVector<f64>,
    /// Principal components, one per row (k x d)
    pub components: DMatrix<f64>,
}

impl PcaProjection {
    pub fn new(mean: DVector<f64>, components: DMatrix<f64>) -> Result<Self, ExtractionError> {
        if components.ncols() != mean.len() {
            return Err(ExtractionError::DescriptorDimension {
                expected: mean.len(),
                actual: components.ncols(),
            });
        }
        Ok(Self { mean, components })
    }

    /// Fit the top-`k` components of a descriptor set via truncated SVD
    pub fn fit(descriptors: &[Vec<f64>], k: usize) -> Result<Self, ExtractionError> {
        let d = descriptors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(bad) = descriptors.iter().find(|v| v.len() != d) {
            return Err(ExtractionError::DescriptorDimension { expected: d, actual: bad.len() });
        }
        let n = descriptors.len();
        if n == 0 || d < k {
            return Err(ExtractionError::DescriptorDimension { expected: k, actual: d });
        }

        let data = DMatrix::from_fn(n, d, |i, j| descriptors[i][j]);
        let mean = DVector::from_fn(d, |j, _| data.column(j).mean());
        let centered = DMatrix::from_fn(n, d, |i, j| data[(i, j)] - mean[j]);

        let svd = centered.svd(false, true);
        let v_t = svd.v_t.ok_or(ExtractionError::NonFinite)?;
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Fewer samples than components: the remaining rows stay zero
        let mut components = DMatrix::zeros(k, d);
        for (row, &idx) in order.iter().take(k).enumerate() {
            components.row_mut(row).copy_from(&v_t.row(idx));
        }
        Self::new(mean, components)
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn output_dim(&self) -> usize {
        self.components.nrows()
    }

    pub fn project(&self, descriptor: &[f64]) -> Result<Vec<f64>, ExtractionError> {
        if descriptor.len() != self.input_dim() {
            return Err(ExtractionError::DescriptorDimension {
                expected: self.input_dim(),
                actual: descriptor.len(),
            });
        }
        let centered = DVector::from_column_slice(descriptor) - &self.mean;
        Ok((&self.components * centered).iter().copied().collect())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Face capture to 32 numbers
#[derive(Clone)]
pub struct FaceExtractor {
    detector: Arc<dyn FaceDetector>,
    projection: PcaProjection,
}

impl FaceExtractor {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        projection: PcaProjection,
    ) -> Result<Self, ExtractionError> {
        if projection.output_dim() != FACE_FEATURE_DIM {
            return Err(ExtractionError::DescriptorDimension {
                expected: FACE_FEATURE_DIM,
                actual: projection.output_dim(),
            });
        }
        Ok(Self { detector, projection })
    }

    pub fn projection(&self) -> &PcaProjection {
        &self.projection
    }

    fn detection(&self, sample: &Sample) -> Result<(Vec<Point2>, Vec<f64>), ExtractionError> {
        if let Some(meta) = &sample.metadata {
            if let Some(descriptor) = &meta.descriptor {
                return Ok((meta.landmarks.clone(), descriptor.clone()));
            }
        }
        let found = self
            .detector
            .detect(&sample.raster)
            .ok_or(ExtractionError::NoFaceDetected)?;
        Ok((found.landmarks, found.descriptor))
    }
}

impl FeatureExtractor for FaceExtractor {
    fn modality(&self) -> Modality {
        Modality::Face
    }

    fn analyze(&self, sample: &Sample) -> Result<Extraction, ExtractionError> {
        check_modality(Modality::Face, sample)?;
        let (landmarks, descriptor) = self.detection(sample)?;
        if landmarks.len() < MIN_LANDMARKS {
            return Err(ExtractionError::UnusableLandmarks {
                found: landmarks.len(),
                required: MIN_LANDMARKS,
            });
        }
        let features = finish(Modality::Face, self.projection.project(&descriptor)?)?;
        Ok(Extraction {
            features,
            descriptor: Some(descriptor),
            landmarks: Some(landmarks),
        })
    }
}
