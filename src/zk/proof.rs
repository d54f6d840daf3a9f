//! Proof generation, delegated to a remote service or computed locally
//!
//! Both paths consume the same `ProofRequest`, built once from the quantized
//! model, its commitment and the quantized input. Switching from delegated to
//! local after a failure reuses that request as is.

use super::commitment::CommitmentHash;
use super::hash::HashPrimitive;
use super::inference::forward;
use super::layout::RecordLayout;
use super::quantize::{QuantizeError, QuantizedModel};
use crate::cancel::CancelHandle;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvingMode {
    Delegated,
    Local,
}

impl fmt::Display for ProvingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvingMode::Delegated => write!(f, "delegated"),
            ProvingMode::Local => write!(f, "local"),
        }
    }
}

/// Proving configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvingConfig {
    pub mode: ProvingMode,
    pub program_id: String,
    pub function_name: String,
    /// Hard limit on one delegated attempt
    pub timeout_secs: u64,
    /// Shown as progress only, never enforced
    pub expected_runtime_secs: u64,
    pub retry: RetryPolicy,
    pub broadcast: bool,
    /// Offer local proving once delegated attempts are exhausted
    pub allow_local_fallback: bool,
}

impl Default for ProvingConfig {
    fn default() -> Self {
        Self {
            mode: ProvingMode::Delegated,
            program_id: "bioproof_enroll_v1".to_string(),
            function_name: "prove_owner".to_string(),
            timeout_secs: 120,
            expected_runtime_secs: 45,
            retry: RetryPolicy::default(),
            broadcast: true,
            allow_local_fallback: true,
        }
    }
}

/// Private key material; never printed
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct ProofRequest {
    pub program_id: String,
    pub function_name: String,
    /// Model record literals followed by input record literals
    pub inputs: Vec<String>,
    pub signing_key: SigningKey,
    pub broadcast: bool,
    pub model: QuantizedModel,
    pub input: Vec<i64>,
    pub commitment: CommitmentHash,
}

impl ProofRequest {
    pub fn build(
        config: &ProvingConfig,
        model: QuantizedModel,
        input: Vec<i64>,
        commitment: CommitmentHash,
        signing_key: SigningKey,
    ) -> Result<Self, QuantizeError> {
        let layout = RecordLayout::for_modality(model.modality);
        let inputs = layout
            .pack(&model)?
            .iter()
            .chain(layout.pack_input(&input)?.iter())
            .map(|r| r.to_literal())
            .collect();
        Ok(Self {
            program_id: config.program_id.clone(),
            function_name: config.function_name.clone(),
            inputs,
            signing_key,
            broadcast: config.broadcast,
            model,
            input,
            commitment,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofArtifact {
    pub proof: String,
    pub outputs: Vec<String>,
    pub mode: ProvingMode,
    pub generated_at: DateTime<Utc>,
}

/// What the remote service hands back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub proof: String,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("proving service returned {code}: {message}")]
    Service { code: u16, message: String },

    #[error("proving timed out after {0:?}")]
    Timeout(Duration),

    #[error("proving request rejected: {0}")]
    Rejected(String),

    #[error("proving cancelled")]
    Cancelled,

    #[error("local prover worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),
}

impl ProverError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ProverError::Network(_) | ProverError::Timeout(_) => true,
            ProverError::Service { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

/// Transport to the remote proving service
pub trait ProvingService: Send + Sync {
    fn execute<'a>(&'a self, request: &'a ProofRequest) -> BoxFuture<'a, Result<ServiceResponse, ProverError>>;
}

pub trait Prover: Send + Sync {
    fn mode(&self) -> ProvingMode;

    fn prove<'a>(
        &'a self,
        request: &'a ProofRequest,
        cancel: &'a CancelHandle,
    ) -> BoxFuture<'a, Result<ProofArtifact, ProverError>>;
}

/// Remote proving bounded by a timeout and raced against cancellation
pub struct DelegatedProver {
    service: Arc<dyn ProvingService>,
    timeout: Duration,
}

impl DelegatedProver {
    pub fn new(service: Arc<dyn ProvingService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }
}

impl Prover for DelegatedProver {
    fn mode(&self) -> ProvingMode {
        ProvingMode::Delegated
    }

    fn prove<'a>(
        &'a self,
        request: &'a ProofRequest,
        cancel: &'a CancelHandle,
    ) -> BoxFuture<'a, Result<ProofArtifact, ProverError>> {
        Box::pin(async move {
            info!(
                "Delegated proving {}/{} with {} inputs",
                request.program_id,
                request.function_name,
                request.inputs.len()
            );
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProverError::Cancelled),
                r = tokio::time::timeout(self.timeout, self.service.execute(request)) => match r {
                    Ok(inner) => inner?,
                    Err(_) => {
                        warn!("Delegated proving exceeded {:?}", self.timeout);
                        return Err(ProverError::Timeout(self.timeout));
                    }
                },
            };
            Ok(ProofArtifact {
                proof: response.proof,
                outputs: response.outputs,
                mode: ProvingMode::Delegated,
                generated_at: Utc::now(),
            })
        })
    }
}

/// On-device proving: re-derives the commitment from the request's model,
/// runs the fixed-point inference and binds everything into a transcript.
pub struct LocalProver {
    hash: Arc<dyn HashPrimitive>,
}

impl LocalProver {
    pub fn new(hash: Arc<dyn HashPrimitive>) -> Self {
        Self { hash }
    }

    fn compute(request: &ProofRequest, hash: &dyn HashPrimitive) -> Result<ServiceResponse, ProverError> {
        let layout = RecordLayout::for_modality(request.model.modality);
        let records = layout.pack(&request.model)?;
        if !request.commitment.verify(&records, hash) {
            return Err(ProverError::Rejected("commitment does not match the model".into()));
        }
        let output = forward(&request.model, &request.input)?;

        let mut hasher = Sha256::new();
        hasher.update(b"bioproof/local-proof/v1");
        hasher.update(request.program_id.as_bytes());
        hasher.update(request.function_name.as_bytes());
        hasher.update(request.commitment.root.as_bytes());
        for v in &request.input {
            hasher.update(v.to_le_bytes());
        }
        for v in &output.logits {
            hasher.update(v.to_le_bytes());
        }

        let mut outputs: Vec<String> = output.logits.iter().map(|l| l.to_string()).collect();
        outputs.push(output.predicted.to_string());
        Ok(ServiceResponse {
            proof: hex::encode(hasher.finalize()),
            outputs,
        })
    }
}

impl Prover for LocalProver {
    fn mode(&self) -> ProvingMode {
        ProvingMode::Local
    }

    fn prove<'a>(
        &'a self,
        request: &'a ProofRequest,
        cancel: &'a CancelHandle,
    ) -> BoxFuture<'a, Result<ProofArtifact, ProverError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ProverError::Cancelled);
            }
            info!("Local proving over {} model values", request.model.w1.len() + request.model.w2.len());
            let owned = request.clone();
            let hash = self.hash.clone();
            let worker = tokio::task::spawn_blocking(move || Self::compute(&owned, hash.as_ref()));
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProverError::Cancelled),
                joined = worker => joined.map_err(|e| ProverError::Worker(e.to_string()))??,
            };
            Ok(ProofArtifact {
                proof: response.proof,
                outputs: response.outputs,
                mode: ProvingMode::Local,
                generated_at: Utc::now(),
            })
        })
    }
}
