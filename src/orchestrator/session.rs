use super::collaborators::TransactionId;
use super::state::EnrollState;
use crate::guard::{DuplicateBaseline, DuplicateGuard, GuardThresholds};
use crate::sample::{FeatureVector, Modality, Sample};
use crate::train::{Classifier, TrainHistory, TrainingDataset};
use crate::zk::{CommittedModel, ProofArtifact, ProofRequest, ProvingMode};

/// Counters for the bounded retry loops of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    /// Failed captures in the current capture step
    pub capture: u32,
    /// Proof generation rounds started
    pub proving: u32,
    /// Registration attempts made
    pub registration: u32,
}

/// All state of one enrollment attempt; owned by the orchestrator
pub struct EnrollmentSession {
    pub id: String,
    pub modality: Modality,
    pub state: EnrollState,
    /// Accepted captures, a pre-existing baseline first when there is one
    pub samples: Vec<Sample>,
    /// Features of `samples`, index for index
    pub features: Vec<FeatureVector>,
    pub guard: DuplicateGuard,
    /// Leading entries of `samples` that came with the session, not from capture
    pub preloaded: usize,
    pub dataset: Option<TrainingDataset>,
    pub classifier: Option<Classifier>,
    pub history: Option<TrainHistory>,
    pub committed: Option<CommittedModel>,
    pub proof_request: Option<ProofRequest>,
    pub artifact: Option<ProofArtifact>,
    pub proving_mode: ProvingMode,
    pub transaction: Option<TransactionId>,
    pub retries: RetryCounters,
}

impl EnrollmentSession {
    pub fn new(modality: Modality, thresholds: &GuardThresholds, proving_mode: ProvingMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modality,
            state: EnrollState::Initial,
            samples: Vec::new(),
            features: Vec::new(),
            guard: DuplicateGuard::new(thresholds),
            preloaded: 0,
            dataset: None,
            classifier: None,
            history: None,
            committed: None,
            proof_request: None,
            artifact: None,
            proving_mode,
            transaction: None,
            retries: RetryCounters::default(),
        }
    }

    /// Captures taken in this session, not counting preloaded baselines
    pub fn captured(&self) -> usize {
        self.samples.len() - self.preloaded
    }

    pub fn accept(&mut self, sample: Sample, features: FeatureVector, baseline: DuplicateBaseline) {
        self.samples.push(sample);
        self.features.push(features);
        self.guard.accept(baseline);
    }

    /// Discard the most recent capture; preloaded baselines are never popped
    pub fn discard_last(&mut self) -> Option<Sample> {
        if self.captured() == 0 {
            return None;
        }
        self.features.pop();
        self.guard.pop();
        self.samples.pop()
    }

    pub fn reset(&mut self, proving_mode: ProvingMode) {
        self.id = uuid::Uuid::new_v4().to_string();
        self.state = EnrollState::Initial;
        self.samples.clear();
        self.features.clear();
        self.guard.clear();
        self.preloaded = 0;
        self.dataset = None;
        self.classifier = None;
        self.history = None;
        self.committed = None;
        self.proof_request = None;
        self.artifact = None;
        self.proving_mode = proving_mode;
        self.transaction = None;
        self.retries = RetryCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    fn entry(v: f64) -> (Sample, FeatureVector, DuplicateBaseline) {
        (
            Sample::new(Modality::Signature, Raster::zeros(4, 4)),
            FeatureVector::new(Modality::Signature, vec![v; 20]).unwrap(),
            DuplicateBaseline { descriptor: Some(vec![v]), ahash: None },
        )
    }

    #[test]
    fn test_preloaded_never_discarded() {
        let mut session = EnrollmentSession::new(Modality::Signature, &GuardThresholds::signature(), ProvingMode::Local);
        let (s, f, b) = entry(1.0);
        session.accept(s, f, b);
        session.preloaded = 1;
        assert_eq!(session.captured(), 0);
        assert!(session.discard_last().is_none());

        let (s, f, b) = entry(2.0);
        session.accept(s, f, b);
        assert_eq!(session.captured(), 1);
        assert!(session.discard_last().is_some());
        assert_eq!(session.samples.len(), 1);
        assert_eq!(session.guard.len(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = EnrollmentSession::new(Modality::Signature, &GuardThresholds::signature(), ProvingMode::Delegated);
        let old_id = session.id.clone();
        let (s, f, b) = entry(1.0);
        session.accept(s, f, b);
        session.state = EnrollState::Trained;
        session.retries.registration = 2;
        session.reset(ProvingMode::Delegated);
        assert_eq!(session.state, EnrollState::Initial);
        assert!(session.samples.is_empty() && session.features.is_empty() && session.guard.is_empty());
        assert_eq!(session.retries, RetryCounters::default());
        assert_ne!(session.id, old_id);
    }
}
