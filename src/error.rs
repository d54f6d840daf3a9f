//! Crate-level error type
//!
//! Each component has its own error enum; `EnrollError` wraps them so the
//! orchestrator can classify any failure with `kind()` and decide between
//! retrying in place and moving to `FAILED`.

use crate::augment::AugmentError;
use crate::features::ExtractionError;
use crate::orchestrator::{CaptureError, EnrollState, RegistrarError};
use crate::storage::StorageError;
use crate::train::TrainingError;
use crate::zk::{ProverError, QuantizeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-checkable failure category carried by the `FAILED` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Capture,
    Extraction,
    Augmentation,
    Training,
    Quantization,
    Proving,
    Registration,
    Storage,
    InvalidTransition,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Capture => "capture",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Augmentation => "augmentation",
            ErrorKind::Training => "training",
            ErrorKind::Quantization => "quantization",
            ErrorKind::Proving => "proving",
            ErrorKind::Registration => "registration",
            ErrorKind::Storage => "storage",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("feature extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("augmentation failed: {0}")]
    Augment(#[from] AugmentError),

    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("quantization failed: {0}")]
    Quantize(#[from] QuantizeError),

    #[error("proof generation failed: {0}")]
    Prover(#[from] ProverError),

    #[error("registration failed: {0}")]
    Registrar(#[from] RegistrarError),

    #[error("model storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("'{action}' is not allowed in state {state}")]
    InvalidTransition { state: EnrollState, action: &'static str },

    #[error("training worker failed: {0}")]
    Worker(String),
}

impl EnrollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollError::Capture(_) => ErrorKind::Capture,
            EnrollError::Extraction(_) => ErrorKind::Extraction,
            EnrollError::Augment(_) => ErrorKind::Augmentation,
            EnrollError::Training(TrainingError::Cancelled(_)) => ErrorKind::Cancelled,
            EnrollError::Training(_) | EnrollError::Worker(_) => ErrorKind::Training,
            EnrollError::Quantize(_) => ErrorKind::Quantization,
            EnrollError::Prover(ProverError::Cancelled) => ErrorKind::Cancelled,
            EnrollError::Prover(ProverError::Quantize(_)) => ErrorKind::Quantization,
            EnrollError::Prover(_) => ErrorKind::Proving,
            EnrollError::Registrar(_) => ErrorKind::Registration,
            EnrollError::Storage(_) => ErrorKind::Storage,
            EnrollError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }

    /// Whether the session can stay in its current state and try again
    pub fn is_retryable(&self) -> bool {
        match self {
            EnrollError::Capture(_) | EnrollError::Extraction(_) => true,
            EnrollError::Prover(e) => e.is_retryable(),
            EnrollError::Registrar(e) => e.is_retryable(),
            EnrollError::InvalidTransition { .. } => true,
            _ => false,
        }
    }
}
