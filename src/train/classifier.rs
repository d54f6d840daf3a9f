//! Prediction contract shared by freshly trained and imported models

use super::dataset::Label;
use super::mlp::TrainedModel;
use super::scaler::StandardScaler;
use super::trainer::TrainingError;
use crate::sample::{FeatureVector, Modality};
use serde::{Deserialize, Serialize};

/// Trained model plus everything needed to score a raw feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    pub model: TrainedModel,
    pub scaler: StandardScaler,
    /// Output index -> label, ascending
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    pub probabilities: Vec<(Label, f64)>,
}

impl Prediction {
    pub fn probability(&self, label: Label) -> f64 {
        self.probabilities
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

impl Classifier {
    pub fn new(model: TrainedModel, scaler: StandardScaler, labels: Vec<Label>) -> Self {
        Self { model, scaler, labels }
    }

    pub fn modality(&self) -> Modality {
        self.model.modality
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, TrainingError> {
        if features.modality() != self.modality() {
            return Err(TrainingError::ModalityMismatch {
                index: 0,
                expected: self.modality(),
                actual: features.modality(),
            });
        }
        if features.len() != self.scaler.dim() {
            return Err(TrainingError::DimensionMismatch {
                index: 0,
                expected: self.scaler.dim(),
                actual: features.len(),
            });
        }
        if !features.is_finite() {
            return Err(TrainingError::NonFinite { index: 0 });
        }

        let x = self.scaler.transform_vector(features.values());
        let p = self.model.predict_proba(&x);
        let probabilities: Vec<(Label, f64)> =
            self.labels.iter().copied().zip(p.iter().copied()).collect();
        // First maximum wins on ties
        let best = probabilities
            .iter()
            .fold(None, |acc: Option<(Label, f64)>, &(l, v)| match acc {
                Some((_, bv)) if bv >= v => acc,
                _ => Some((l, v)),
            });
        let label = best.map(|(l, _)| l).ok_or(TrainingError::EmptyDataset)?;
        Ok(Prediction { label, probabilities })
    }
}
