//! Model export and import
//!
//! A `ModelBundle` is a JSON file holding the classifier (weights, scaler,
//! label mapping, modality) and optionally its commitment. A SHA-256 checksum
//! over the serialized payload is verified on import, and the architecture is
//! checked before a `Classifier` is handed back.

use crate::sample::{Architecture, Modality};
use crate::train::{Classifier, Label};
use crate::zk::CommitmentHash;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bundle: {0}")]
    Format(#[from] serde_json::Error),

    #[error("unsupported bundle version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("checksum mismatch: bundle says {expected}, payload hashes to {actual}")]
    Checksum { expected: String, actual: String },

    #[error("bundle model has shape {actual:?}, {modality} expects {expected:?}")]
    Architecture {
        modality: Modality,
        expected: Architecture,
        actual: Architecture,
    },

    #[error("bundle labels {0:?} do not match the output layer")]
    Labels(Vec<Label>),

    #[error("scaler has {actual} features, model expects {expected}")]
    Scaler { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub modality: Modality,
    pub classifier: Classifier,
    pub commitment: Option<CommitmentHash>,
}

impl BundlePayload {
    fn checksum(&self) -> Result<String, StorageError> {
        let json = serde_json::to_string(self)?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub checksum: String,
    pub payload: BundlePayload,
}

impl ModelBundle {
    pub fn new(classifier: Classifier, commitment: Option<CommitmentHash>) -> Result<Self, StorageError> {
        let payload = BundlePayload {
            modality: classifier.modality(),
            classifier,
            commitment,
        };
        Ok(Self {
            format_version: BUNDLE_FORMAT_VERSION,
            exported_at: Utc::now(),
            checksum: payload.checksum()?,
            payload,
        })
    }

    /// Version, checksum and shape checks
    pub fn verify(&self) -> Result<(), StorageError> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(StorageError::Version {
                found: self.format_version,
                expected: BUNDLE_FORMAT_VERSION,
            });
        }
        let actual = self.payload.checksum()?;
        if actual != self.checksum {
            return Err(StorageError::Checksum {
                expected: self.checksum.clone(),
                actual,
            });
        }

        let classifier = &self.payload.classifier;
        let modality = self.payload.modality;
        let expected = modality.architecture();
        if classifier.modality() != modality || !classifier.model.matches(&expected) {
            return Err(StorageError::Architecture {
                modality,
                expected,
                actual: classifier.model.architecture(),
            });
        }
        if classifier.labels.len() != expected.output {
            return Err(StorageError::Labels(classifier.labels.clone()));
        }
        if classifier.scaler.dim() != expected.input || classifier.scaler.std.len() != expected.input {
            return Err(StorageError::Scaler {
                expected: expected.input,
                actual: classifier.scaler.dim(),
            });
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let json = std::fs::read_to_string(path)?;
        let bundle: Self = serde_json::from_str(&json)?;
        bundle.verify()?;
        Ok(bundle)
    }

    pub fn into_classifier(self) -> Classifier {
        self.payload.classifier
    }
}

/// Write a classifier (and its commitment, when known) to `path`
pub fn export(
    classifier: &Classifier,
    commitment: Option<&CommitmentHash>,
    path: impl AsRef<Path>,
) -> Result<ModelBundle, StorageError> {
    let bundle = ModelBundle::new(classifier.clone(), commitment.cloned())?;
    bundle.save(&path)?;
    info!(
        "Exported {} model to {} (checksum {})",
        bundle.payload.modality,
        path.as_ref().display(),
        &bundle.checksum[..16]
    );
    Ok(bundle)
}

/// Read and verify a bundle written by `export`
pub fn import(path: impl AsRef<Path>) -> Result<ModelBundle, StorageError> {
    let bundle = ModelBundle::load(&path)?;
    info!(
        "Imported {} model from {}, checksum OK",
        bundle.payload.modality,
        path.as_ref().display()
    );
    Ok(bundle)
}
