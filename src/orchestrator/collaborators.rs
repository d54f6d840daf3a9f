//! External collaborators the orchestrator drives: the capture device and
//! the on-chain registrar. Proving services live in `zk`.

use crate::sample::{Modality, Sample};
use crate::zk::CommitmentHash;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("capture permission denied")]
    Denied,

    #[error("capture device unavailable: {0}")]
    Unavailable(String),

    #[error("capture cancelled")]
    Cancelled,
}

/// Camera or pen surface
pub trait CaptureDevice: Send + Sync {
    /// Acquire one frame (face) or one completed stroke set (signature)
    fn acquire<'a>(&'a self, modality: Modality) -> BoxFuture<'a, Result<Sample, CaptureError>>;

    /// Release the device handle; safe to call when nothing is held
    fn release(&self);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrarError {
    #[error("wallet rejected the signing request")]
    WalletRejected,

    #[error("network error: {0}")]
    Network(String),

    #[error("transaction failed: {0}")]
    Reverted(String),
}

impl RegistrarError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistrarError::WalletRejected | RegistrarError::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publishes a commitment under an account address
pub trait Registrar: Send + Sync {
    fn register<'a>(
        &'a self,
        address: &'a str,
        commitment: &'a CommitmentHash,
    ) -> BoxFuture<'a, Result<TransactionId, RegistrarError>>;
}
