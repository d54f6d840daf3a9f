//! Bundled impostor feature vectors, loaded once per session

use super::AugmentError;
use crate::sample::{FeatureVector, Modality};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativePool {
    pub modality: Modality,
    pub vectors: Vec<Vec<f64>>,
}

impl NegativePool {
    /// Shape-checked against the modality feature dimension
    pub fn new(modality: Modality, vectors: Vec<Vec<f64>>) -> Result<Self, AugmentError> {
        let pool = Self { modality, vectors };
        pool.validate()?;
        Ok(pool)
    }

    fn validate(&self) -> Result<(), AugmentError> {
        let dim = self.modality.feature_dim();
        for (i, v) in self.vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(AugmentError::NegativePool(format!(
                    "vector {} has {} values, {} expects {}",
                    i,
                    v.len(),
                    self.modality,
                    dim
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(AugmentError::NegativePool(format!("vector {} is not finite", i)));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Draw `count` distinct vectors (all of them if the pool is smaller)
    pub fn draw<R: Rng>(&self, count: usize, rng: &mut R) -> Result<Vec<FeatureVector>, AugmentError> {
        if self.is_empty() {
            return Err(AugmentError::NegativePool("pool is empty".into()));
        }
        let mut indices: Vec<usize> = (0..self.vectors.len()).collect();
        indices.shuffle(rng);
        indices
            .into_iter()
            .take(count)
            .map(|i| {
                FeatureVector::new(self.modality, self.vectors[i].clone())
                    .map_err(|e| AugmentError::NegativePool(e.to_string()))
            })
            .collect()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let pool: Self = serde_json::from_str(&json)?;
        pool.validate()?;
        Ok(pool)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
