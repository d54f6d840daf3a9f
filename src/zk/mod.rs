//! QuantizerHasher: fixed-point models, record packing, commitments and proofs
//!
//! - `quantize`: scale factors and the integer model
//! - `layout`: per-modality record table the verifier reads
//! - `hash` / `commitment`: chunked commitment over the packed records
//! - `inference`: the verifier's integer forward pass
//! - `proof`: delegated and local provers over one request type

mod commitment;
mod hash;
mod inference;
mod layout;
mod proof;
mod quantize;

pub use commitment::{CommitmentHash, RECORDS_PER_CHUNK};
pub use hash::{HashPrimitive, Sha256FieldHash};
pub use inference::{forward, quantize_input, FixedPointOutput};
pub use layout::{field_bits, pair_field, single_field, FieldEncoding, QuantizedRecord, RecordLayout, Segment, Tensor};
pub use proof::{
    DelegatedProver, LocalProver, ProofArtifact, ProofRequest, Prover, ProverError, ProvingConfig,
    ProvingMode, ProvingService, ServiceResponse, SigningKey,
};
pub use quantize::{quantize_slice, QuantConfig, QuantizeError, QuantizedModel, ScaleFactors};

#[cfg(test)]
pub(crate) use proof::tests as proof_fixtures;

use crate::sample::FeatureVector;
use crate::train::{Classifier, TrainedModel};
use log::info;
use std::sync::Arc;

/// A quantized model together with its packed records and commitment
#[derive(Debug, Clone)]
pub struct CommittedModel {
    pub quantized: QuantizedModel,
    pub records: Vec<QuantizedRecord>,
    pub commitment: CommitmentHash,
}

/// Stateless quantize-pack-hash pipeline
#[derive(Clone)]
pub struct QuantizerHasher {
    scales: ScaleFactors,
    hash: Arc<dyn HashPrimitive>,
}

impl QuantizerHasher {
    pub fn new(config: &QuantConfig, hash: Arc<dyn HashPrimitive>) -> Result<Self, QuantizeError> {
        Ok(Self {
            scales: ScaleFactors::from_base(config.s1)?,
            hash,
        })
    }

    /// Uses the bundled SHA-256 field hash
    pub fn with_default_hash(config: &QuantConfig) -> Result<Self, QuantizeError> {
        Self::new(config, Arc::new(Sha256FieldHash))
    }

    pub fn scales(&self) -> ScaleFactors {
        self.scales
    }

    pub fn hash(&self) -> Arc<dyn HashPrimitive> {
        self.hash.clone()
    }

    pub fn commit(&self, model: &TrainedModel) -> Result<CommittedModel, QuantizeError> {
        let quantized = QuantizedModel::from_model(model, self.scales)?;
        let records = RecordLayout::for_modality(model.modality).pack(&quantized)?;
        let commitment = CommitmentHash::compute(&records, self.hash.as_ref())?;
        info!(
            "Committed {} model: {} records in {} chunks, root {}",
            model.modality,
            records.len(),
            commitment.chunks.len(),
            commitment.root
        );
        Ok(CommittedModel {
            quantized,
            records,
            commitment,
        })
    }

    pub fn quantize_input(&self, classifier: &Classifier, features: &FeatureVector) -> Result<Vec<i64>, QuantizeError> {
        quantize_input(classifier, features, &self.scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Modality;
    use crate::train::Lcg;

    #[test]
    fn test_commit_is_pure() {
        let qh = QuantizerHasher::with_default_hash(&QuantConfig::default()).unwrap();
        let model = TrainedModel::initialize(Modality::Face, &mut Lcg::new(10));
        let a = qh.commit(&model).unwrap();
        let b = qh.commit(&model.clone()).unwrap();
        assert_eq!(a.commitment, b.commitment);
        assert_eq!(a.records.len(), 12);
        assert_eq!(a.commitment.chunks.len(), 3);
    }

    #[test]
    fn test_weight_change_changes_root() {
        let qh = QuantizerHasher::with_default_hash(&QuantConfig::default()).unwrap();
        let mut model = TrainedModel::initialize(Modality::Signature, &mut Lcg::new(10));
        let before = qh.commit(&model).unwrap().commitment;
        model.w2[(1, 3)] += 0.01;
        let after = qh.commit(&model).unwrap().commitment;
        assert_ne!(before.root, after.root);
    }

    #[test]
    fn test_scale_change_changes_root() {
        let model = TrainedModel::initialize(Modality::Signature, &mut Lcg::new(10));
        let a = QuantizerHasher::with_default_hash(&QuantConfig { s1: 1024 }).unwrap();
        let b = QuantizerHasher::with_default_hash(&QuantConfig { s1: 512 }).unwrap();
        assert_ne!(a.commit(&model).unwrap().commitment.root, b.commit(&model).unwrap().commitment.root);
    }
}
