//! Enrollment configuration
//!
//! Every tunable of the pipeline in one serde struct. Missing fields in a
//! JSON file fall back to the shipped defaults.

use crate::augment::AugmentConfig;
use crate::guard::GuardThresholds;
use crate::retry::RetryPolicy;
use crate::sample::Modality;
use crate::train::TrainConfig;
use crate::zk::{ProvingConfig, QuantConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Duplicate-guard thresholds per modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub signature: GuardThresholds,
    pub face: GuardThresholds,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            signature: GuardThresholds::signature(),
            face: GuardThresholds::face(),
        }
    }
}

impl GuardConfig {
    pub fn for_modality(&self, modality: Modality) -> &GuardThresholds {
        match modality {
            Modality::Signature => &self.signature,
            Modality::Face => &self.face,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub guard: GuardConfig,
    pub augment: AugmentConfig,
    pub train: TrainConfig,
    pub quant: QuantConfig,
    pub proving: ProvingConfig,
    /// Registration attempts; wallet rejections count against this
    pub registration: RetryPolicy,
    /// Failed captures tolerated per capture step
    pub capture_attempts: u32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            augment: AugmentConfig::default(),
            train: TrainConfig::default(),
            quant: QuantConfig::default(),
            proving: ProvingConfig::default(),
            registration: RetryPolicy {
                max_attempts: 3,
                backoff_ms: 0,
            },
            capture_attempts: 5,
        }
    }
}

impl EnrollmentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
