//! Augmenter: a few accepted positives plus a negative pool in, a balanced
//! labeled training set out.
//!
//! Each positive contributes its own features plus `variants_per_sample`
//! synthetic variants. A variant that comes out unusable (no ink, too dark,
//! no face found) is discarded and regenerated up to `max_regenerations`
//! times; it is never silently skipped.

pub mod face;
pub mod negatives;
pub mod signature;

pub use face::{FaceAugment, FaceJitter};
pub use negatives::NegativePool;
pub use signature::SignatureAugment;

use crate::features::{ExtractionError, FeatureExtractor};
use crate::retry::{retry_sync, RetryOutcome, RetryPolicy};
use crate::sample::{FeatureVector, Modality, Sample};
use crate::train::{Label, TrainingDataset};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AugmentError {
    #[error("no positive samples to augment")]
    NoPositives,

    #[error("sample {sample_id} is {actual}, augmenter handles {expected}")]
    ModalityMismatch {
        sample_id: String,
        expected: Modality,
        actual: Modality,
    },

    #[error("extraction failed for sample {sample_id}: {source}")]
    Extraction {
        sample_id: String,
        #[source]
        source: ExtractionError,
    },

    #[error("variant of sample {sample_id} still unusable after {attempts} attempts: {last}")]
    RegenerationExhausted {
        sample_id: String,
        attempts: u32,
        last: ExtractionError,
    },

    #[error("negative pool: {0}")]
    NegativePool(String),

    #[error("invalid augmentation config: {0}")]
    InvalidConfig(String),
}

/// Augmentation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub variants_per_sample: usize,
    pub seed: u64,
    /// Negatives drawn per positive example
    pub negatives_ratio: f64,
    /// Attempts per variant before giving up
    pub max_regenerations: u32,
    pub signature: SignatureAugment,
    pub face: FaceAugment,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            variants_per_sample: 15,
            seed: 7,
            negatives_ratio: 1.0,
            max_regenerations: 20,
            signature: SignatureAugment::default(),
            face: FaceAugment::default(),
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<(), AugmentError> {
        if !self.negatives_ratio.is_finite() || self.negatives_ratio < 0.0 {
            return Err(AugmentError::InvalidConfig(format!(
                "negatives_ratio must be finite and non-negative, got {}",
                self.negatives_ratio
            )));
        }
        self.signature.validate().map_err(AugmentError::InvalidConfig)?;
        self.face.validate().map_err(AugmentError::InvalidConfig)
    }
}

fn regenerable(error: &ExtractionError) -> bool {
    matches!(
        error,
        ExtractionError::NoFaceDetected
            | ExtractionError::UnusableLandmarks { .. }
            | ExtractionError::EmptyForegroundAfterAugmentation
    )
}

/// Stateless between calls; all randomness comes from `config.seed`
#[derive(Clone)]
pub struct Augmenter {
    config: AugmentConfig,
    extractor: Arc<dyn FeatureExtractor>,
}

impl Augmenter {
    pub fn new(config: AugmentConfig, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { config, extractor }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    pub fn modality(&self) -> Modality {
        self.extractor.modality()
    }

    fn synthesize(&self, sample: &Sample, rng: &mut StdRng) -> Result<Sample, ExtractionError> {
        match sample.modality {
            Modality::Signature => {
                let luma = sample.raster.luma();
                let out = signature::variant(&luma, &self.config.signature, rng)?;
                Ok(sample.derive(crate::raster::Raster::gray(out)))
            }
            Modality::Face => {
                let out = face::variant(&sample.raster, &self.config.face, rng)?;
                Ok(sample.derive(out))
            }
        }
    }

    /// Features of one variant, regenerating until usable
    fn variant_features(&self, sample: &Sample, rng: &mut StdRng) -> Result<FeatureVector, AugmentError> {
        let policy = RetryPolicy {
            max_attempts: self.config.max_regenerations,
            backoff_ms: 0,
        };
        let outcome = retry_sync(
            &policy,
            |attempt| {
                let variant = self.synthesize(sample, rng)?;
                self.extractor.extract(&variant).map_err(|e| {
                    debug!("Variant of {} discarded on attempt {}: {}", sample.id, attempt, e);
                    e
                })
            },
            regenerable,
        );
        match outcome {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, attempts } => {
                warn!("Gave up on a variant of {} after {} attempts", sample.id, attempts);
                Err(AugmentError::RegenerationExhausted {
                    sample_id: sample.id.clone(),
                    attempts,
                    last: last_error,
                })
            }
            RetryOutcome::Fatal { error, .. } => Err(AugmentError::Extraction {
                sample_id: sample.id.clone(),
                source: error,
            }),
        }
    }

    /// The sample's own features followed by `variants_per_sample` variants
    pub fn expand(&self, sample: &Sample, rng: &mut StdRng) -> Result<Vec<FeatureVector>, AugmentError> {
        self.config.validate()?;
        if sample.modality != self.modality() {
            return Err(AugmentError::ModalityMismatch {
                sample_id: sample.id.clone(),
                expected: self.modality(),
                actual: sample.modality,
            });
        }
        let original = self.extractor.extract(sample).map_err(|source| AugmentError::Extraction {
            sample_id: sample.id.clone(),
            source,
        })?;
        let mut out = Vec::with_capacity(self.config.variants_per_sample + 1);
        out.push(original);
        for _ in 0..self.config.variants_per_sample {
            out.push(self.variant_features(sample, rng)?);
        }
        Ok(out)
    }

    /// Build the labeled set: expanded positives, then pool negatives
    pub fn augment(&self, positives: &[Sample], pool: &NegativePool) -> Result<TrainingDataset, AugmentError> {
        if positives.is_empty() {
            return Err(AugmentError::NoPositives);
        }
        if pool.modality != self.modality() {
            return Err(AugmentError::NegativePool(format!(
                "pool is {}, enrolling {}",
                pool.modality,
                self.modality()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut dataset = TrainingDataset::new(self.modality());
        for sample in positives {
            for features in self.expand(sample, &mut rng)? {
                dataset.push(features, Label::Genuine);
            }
        }

        let positive_count = dataset.len();
        let wanted = (positive_count as f64 * self.config.negatives_ratio).round() as usize;
        let negatives = pool.draw(wanted.max(1), &mut rng)?;
        if negatives.len() < wanted {
            warn!(
                "Negative pool has {} vectors, wanted {}; dataset will be unbalanced",
                negatives.len(),
                wanted
            );
        }
        for features in negatives {
            dataset.push(features, Label::Impostor);
        }

        info!(
            "Augmented {} {} samples into {} examples ({} genuine / {} impostor)",
            positives.len(),
            self.modality(),
            dataset.len(),
            dataset.count(Label::Genuine),
            dataset.count(Label::Impostor),
        );
        Ok(dataset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::negatives::tests::pool;
    use super::*;
    use crate::features::face_fixtures::{test_projection, textured_face, StubDetector};
    use crate::features::{FaceExtractor, SignatureExtractor};
    use crate::raster::Raster;
    use nalgebra::DMatrix;

    /// Thick strokes, a few percent ink, shifted by `seed`
    pub fn signature_sample(seed: usize) -> Sample {
        let mut img = DMatrix::zeros(48, 96);
        for x in 10 + seed..70 + seed {
            for t in 0..4 {
                img[(14 + seed + t, x)] = 255.0;
            }
        }
        for y in 10..40 {
            for t in 0..4 {
                img[(y, 30 + seed * 5 + t)] = 255.0;
            }
        }
        for d in 0..20 {
            for t in 0..3 {
                img[(20 + d, 60 + d + t)] = 255.0;
            }
        }
        Sample::new(Modality::Signature, Raster::gray(img))
    }

    fn small_config() -> AugmentConfig {
        AugmentConfig {
            variants_per_sample: 4,
            ..AugmentConfig::default()
        }
    }

    fn signature_augmenter() -> Augmenter {
        Augmenter::new(small_config(), Arc::new(SignatureExtractor::new()))
    }

    #[test]
    fn test_signature_dataset_balanced() {
        let positives: Vec<Sample> = (0..3).map(signature_sample).collect();
        let ds = signature_augmenter()
            .augment(&positives, &pool(Modality::Signature, 100))
            .unwrap();
        assert_eq!(ds.count(Label::Genuine), 15);
        assert_eq!(ds.count(Label::Impostor), 15);
        assert!(ds.examples.iter().all(|e| e.features.len() == 20));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let positives = vec![signature_sample(1)];
        let negatives = pool(Modality::Signature, 20);
        let a = signature_augmenter().augment(&positives, &negatives).unwrap();
        let b = signature_augmenter().augment(&positives, &negatives).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_rotation_bound_is_an_error() {
        let mut config = small_config();
        config.signature.max_rotation_deg = -5.0;
        let augmenter = Augmenter::new(config, Arc::new(SignatureExtractor::new()));
        let err = augmenter
            .augment(&[signature_sample(0)], &pool(Modality::Signature, 5))
            .unwrap_err();
        assert!(matches!(err, AugmentError::InvalidConfig(ref m) if m.contains("max_rotation_deg")));
    }

    #[test]
    fn test_no_positives() {
        let err = signature_augmenter()
            .augment(&[], &pool(Modality::Signature, 5))
            .unwrap_err();
        assert_eq!(err, AugmentError::NoPositives);
    }

    #[test]
    fn test_blank_sample_exhausts_regeneration() {
        let augmenter = Augmenter::new(
            AugmentConfig { max_regenerations: 3, ..small_config() },
            Arc::new(SignatureExtractor::new()),
        );
        let blank = Sample::new(Modality::Signature, Raster::zeros(20, 20));
        let err = augmenter.augment(&[blank], &pool(Modality::Signature, 5)).unwrap_err();
        assert!(matches!(
            err,
            AugmentError::RegenerationExhausted {
                attempts: 3,
                last: ExtractionError::EmptyForegroundAfterAugmentation,
                ..
            }
        ));
    }

    #[test]
    fn test_face_variants_go_through_detector() {
        let extractor = FaceExtractor::new(Arc::new(StubDetector { landmarks: 68 }), test_projection()).unwrap();
        let augmenter = Augmenter::new(small_config(), Arc::new(extractor));
        let positives = vec![Sample::new(Modality::Face, textured_face(2))];
        let ds = augmenter.augment(&positives, &pool(Modality::Face, 10)).unwrap();
        assert_eq!(ds.count(Label::Genuine), 5);
        assert!(ds.examples.iter().all(|e| e.features.len() == 32));
    }

    #[test]
    fn test_pool_modality_checked() {
        let positives = vec![signature_sample(0)];
        let err = signature_augmenter()
            .augment(&positives, &pool(Modality::Face, 5))
            .unwrap_err();
        assert!(matches!(err, AugmentError::NegativePool(_)));
    }
}
