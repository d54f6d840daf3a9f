//! EnrollmentOrchestrator: the session state machine
//!
//! ```text
//! INITIAL -> REPEAT1 -> REPEAT2 -> CONFIRM -> TRAINING -> TRAINED
//!   -> CREATE_PROOF -> CREATING_AUTHORIZATION -> GENERATING_PROOF
//!   -> PROOF_GENERATED -> PROOF_DETAILS -> REGISTERING -> COMPLETE
//! ```
//!
//! The orchestrator owns the `EnrollmentSession` and is the only thing that
//! mutates it. Each transition is a method; recoverable failures leave the
//! state where it was, fatal ones move to `FAILED`. Progress goes out on an
//! unbounded channel of `EnrollmentEvent`s.
//!
//! Training runs on a blocking worker and reports every epoch. Capture and
//! proving are raced against the session's `CancelHandle`.

mod collaborators;
mod events;
mod session;
mod state;

pub use collaborators::{CaptureDevice, CaptureError, Registrar, RegistrarError, TransactionId};
pub use events::EnrollmentEvent;
pub use session::{EnrollmentSession, RetryCounters};
pub use state::EnrollState;

use crate::augment::{AugmentError, Augmenter, NegativePool};
use crate::cancel::CancelHandle;
use crate::config::EnrollmentConfig;
use crate::error::EnrollError;
use crate::features::FeatureExtractor;
use crate::guard::{DuplicateBaseline, RejectReason, Verdict};
use crate::retry::{retry_async, RetryOutcome};
use crate::sample::{Modality, Sample};
use crate::storage::{self, ModelBundle};
use crate::train::{TrainHistory, TrainingError};
use crate::zk::{
    DelegatedProver, LocalProver, ProofArtifact, ProofRequest, Prover, ProverError, ProvingConfig, ProvingMode,
    ProvingService, QuantizerHasher, SigningKey,
};
use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Accepted samples needed before training (a preloaded baseline counts)
pub const SAMPLES_REQUIRED: usize = 3;

/// External services handed to the orchestrator
pub struct Collaborators {
    pub device: Arc<dyn CaptureDevice>,
    pub registrar: Arc<dyn Registrar>,
    pub delegated: Option<Arc<dyn Prover>>,
    /// Defaults to a `LocalProver` over the configured hash primitive
    pub local: Option<Arc<dyn Prover>>,
}

impl Collaborators {
    pub fn new(device: Arc<dyn CaptureDevice>, registrar: Arc<dyn Registrar>) -> Self {
        Self {
            device,
            registrar,
            delegated: None,
            local: None,
        }
    }

    /// Delegated proving through `service`, bounded by the configured timeout
    pub fn with_proving_service(mut self, service: Arc<dyn ProvingService>, config: &ProvingConfig) -> Self {
        self.delegated = Some(Arc::new(DelegatedProver::new(
            service,
            Duration::from_secs(config.timeout_secs),
        )));
        self
    }

    pub fn with_delegated_prover(mut self, prover: Arc<dyn Prover>) -> Self {
        self.delegated = Some(prover);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Accepted { next: EnrollState },
    /// Not an error: the user is asked to recapture in the same step
    TooSimilar { reason: RejectReason, guidance: String },
}

fn guidance(modality: Modality) -> &'static str {
    match modality {
        Modality::Face => "Turn your head slightly or change your expression, then try again",
        Modality::Signature => "Vary your stroke a little, then sign again",
    }
}

pub struct EnrollmentOrchestrator {
    config: EnrollmentConfig,
    session: EnrollmentSession,
    extractor: Arc<dyn FeatureExtractor>,
    augmenter: Augmenter,
    negatives: Arc<NegativePool>,
    quantizer: QuantizerHasher,
    device: Arc<dyn CaptureDevice>,
    registrar: Arc<dyn Registrar>,
    delegated: Option<Arc<dyn Prover>>,
    local: Arc<dyn Prover>,
    baseline: Option<Sample>,
    events: mpsc::UnboundedSender<EnrollmentEvent>,
    cancel: CancelHandle,
}

impl EnrollmentOrchestrator {
    pub fn new(
        config: EnrollmentConfig,
        extractor: Arc<dyn FeatureExtractor>,
        negatives: NegativePool,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EnrollmentEvent>), EnrollError> {
        let modality = extractor.modality();
        if negatives.modality != modality {
            return Err(AugmentError::NegativePool(format!(
                "pool is {}, enrolling {}",
                negatives.modality, modality
            ))
            .into());
        }
        config.augment.validate()?;
        let quantizer = QuantizerHasher::with_default_hash(&config.quant)?;
        let local = collaborators
            .local
            .unwrap_or_else(|| Arc::new(LocalProver::new(quantizer.hash())));
        let mode = Self::initial_mode(&config, collaborators.delegated.is_some());
        let session = EnrollmentSession::new(modality, config.guard.for_modality(modality), mode);
        let (tx, rx) = mpsc::unbounded_channel();

        info!("Enrollment session {} created for {} ({} proving)", session.id, modality, mode);
        let orchestrator = Self {
            augmenter: Augmenter::new(config.augment.clone(), extractor.clone()),
            config,
            session,
            extractor,
            negatives: Arc::new(negatives),
            quantizer,
            device: collaborators.device,
            registrar: collaborators.registrar,
            delegated: collaborators.delegated,
            local,
            baseline: None,
            events: tx,
            cancel: CancelHandle::new(),
        };
        Ok((orchestrator, rx))
    }

    fn initial_mode(config: &EnrollmentConfig, has_delegated: bool) -> ProvingMode {
        match config.proving.mode {
            ProvingMode::Delegated if !has_delegated => {
                warn!("Delegated proving configured but no proving service given, using local");
                ProvingMode::Local
            }
            mode => mode,
        }
    }

    pub fn state(&self) -> &EnrollState {
        &self.session.state
    }

    pub fn session(&self) -> &EnrollmentSession {
        &self.session
    }

    pub fn config(&self) -> &EnrollmentConfig {
        &self.config
    }

    /// Handle the presentation layer uses to interrupt a suspended step
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn emit(&self, event: EnrollmentEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped for session {}", self.session.id);
        }
    }

    fn transition(&mut self, to: EnrollState) {
        let from = std::mem::replace(&mut self.session.state, to.clone());
        info!("Enrollment {} [{}]: {} -> {}", &self.session.id[..8], self.session.modality, from, to);
        self.emit(EnrollmentEvent::StateChanged { from, to });
    }

    fn fail(&mut self, error: EnrollError) -> EnrollError {
        let kind = error.kind();
        let message = error.to_string();
        warn!("Enrollment {} failed ({}): {}", &self.session.id[..8], kind, message);
        self.transition(EnrollState::Failed {
            kind,
            message: message.clone(),
        });
        self.emit(EnrollmentEvent::Failed { kind, message });
        error
    }

    fn invalid(&self, action: &'static str) -> EnrollError {
        EnrollError::InvalidTransition {
            state: self.session.state.clone(),
            action,
        }
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), EnrollError> {
        if allowed {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    /// Seed the session with an already trusted capture, e.g. a document
    /// photo. It counts toward the required samples, so one repeat step is
    /// skipped.
    pub fn with_baseline(&mut self, sample: Sample) -> Result<(), EnrollError> {
        self.require(
            self.session.state == EnrollState::Initial && self.session.samples.is_empty(),
            "with_baseline",
        )?;
        self.preload(sample.clone())?;
        self.baseline = Some(sample);
        Ok(())
    }

    fn preload(&mut self, sample: Sample) -> Result<(), EnrollError> {
        let extraction = self.extractor.analyze(&sample)?;
        let baseline = DuplicateBaseline::from_extraction(&sample, &extraction);
        info!("Preloaded baseline {} into session {}", sample.id, &self.session.id[..8]);
        self.session.accept(sample, extraction.features, baseline);
        self.session.preloaded += 1;
        Ok(())
    }

    fn capture_state(&self) -> EnrollState {
        if self.session.samples.len() >= SAMPLES_REQUIRED {
            EnrollState::Confirm
        } else {
            EnrollState::capture_step(self.session.captured())
        }
    }

    fn capture_failed(&mut self, error: EnrollError) -> EnrollError {
        self.session.retries.capture += 1;
        let cap = self.config.capture_attempts.max(1);
        if self.session.retries.capture >= cap {
            return self.fail(error);
        }
        let attempts_left = cap - self.session.retries.capture;
        warn!(
            "Capture failed in {} ({} attempts left): {}",
            self.session.state, attempts_left, error
        );
        self.emit(EnrollmentEvent::CaptureFailed {
            message: error.to_string(),
            attempts_left,
        });
        error
    }

    /// Acquire, extract and duplicate-check one capture
    pub async fn capture(&mut self) -> Result<CaptureOutcome, EnrollError> {
        self.require(self.session.state.is_capture(), "capture")?;

        let acquired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CaptureError::Cancelled),
            r = self.device.acquire(self.session.modality) => r,
        };
        self.device.release();

        let sample = match acquired {
            Ok(sample) => sample,
            Err(CaptureError::Cancelled) => {
                self.cancel.reset();
                info!("Capture cancelled in {}", self.session.state);
                return Err(CaptureError::Cancelled.into());
            }
            Err(e) => return Err(self.capture_failed(e.into())),
        };
        let extraction = match self.extractor.analyze(&sample) {
            Ok(extraction) => extraction,
            Err(e) => return Err(self.capture_failed(e.into())),
        };

        let baseline = DuplicateBaseline::from_extraction(&sample, &extraction);
        match self.session.guard.check(&baseline) {
            Verdict::TooSimilar { reason, .. } => {
                let guidance = guidance(self.session.modality).to_string();
                info!(
                    "Capture {} too similar to an accepted one ({}), staying in {}",
                    sample.id,
                    reason.name(),
                    self.session.state
                );
                self.emit(EnrollmentEvent::CaptureRejected {
                    reason: reason.clone(),
                    guidance: guidance.clone(),
                });
                Ok(CaptureOutcome::TooSimilar { reason, guidance })
            }
            Verdict::Accept { .. } => {
                let sample_id = sample.id.clone();
                self.session.accept(sample, extraction.features, baseline);
                self.session.retries.capture = 0;
                self.emit(EnrollmentEvent::CaptureAccepted {
                    sample_id,
                    accepted: self.session.samples.len(),
                });
                let next = self.capture_state();
                self.transition(next.clone());
                Ok(CaptureOutcome::Accepted { next })
            }
        }
    }

    /// Step back, releasing the device and discarding the capture that the
    /// step being left had accepted
    pub fn back(&mut self) -> Result<EnrollState, EnrollError> {
        let to = match self.session.state {
            EnrollState::Initial => {
                self.device.release();
                return Ok(EnrollState::Initial);
            }
            EnrollState::Repeat1 | EnrollState::Repeat2 | EnrollState::Confirm => {
                self.device.release();
                if let Some(sample) = self.session.discard_last() {
                    debug!("Discarded capture {}", sample.id);
                }
                self.session.retries.capture = 0;
                EnrollState::capture_step(self.session.captured())
            }
            EnrollState::CreateProof | EnrollState::CreatingAuthorization => {
                self.session.proof_request = None;
                EnrollState::Trained
            }
            _ => return Err(self.invalid("back")),
        };
        self.transition(to.clone());
        Ok(to)
    }

    /// User gate between capture and training
    pub fn confirm(&mut self) -> Result<(), EnrollError> {
        self.require(
            self.session.state == EnrollState::Confirm && self.session.samples.len() >= SAMPLES_REQUIRED,
            "confirm",
        )?;
        self.transition(EnrollState::Training);
        Ok(())
    }

    /// Augment, train and commit on a blocking worker. Cancelling returns
    /// the session to CONFIRM; any other failure is fatal.
    pub async fn train(&mut self) -> Result<TrainHistory, EnrollError> {
        self.require(self.session.state == EnrollState::Training, "train")?;

        let samples = self.session.samples.clone();
        let augmenter = self.augmenter.clone();
        let negatives = self.negatives.clone();
        let train_config = self.config.train.clone();
        let quantizer = self.quantizer.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        let worker = tokio::task::spawn_blocking(move || -> Result<_, EnrollError> {
            let dataset = augmenter.augment(&samples, &negatives)?;
            let outcome = crate::train::train(&dataset, &train_config, |record| {
                // A closed receiver does not stop training
                let _ = events.send(EnrollmentEvent::TrainingProgress(record.clone()));
                if cancel.is_cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;
            let committed = quantizer.commit(&outcome.classifier.model)?;
            Ok((dataset, outcome, committed))
        });
        let result = match worker.await {
            Ok(result) => result,
            Err(e) => Err(EnrollError::Worker(e.to_string())),
        };

        match result {
            Ok((dataset, outcome, committed)) => {
                let history = outcome.history.clone();
                info!(
                    "Session {} trained: best validation loss {:.4} at epoch {}, commitment {}",
                    &self.session.id[..8],
                    history.best_validation_loss,
                    history.best_epoch,
                    committed.commitment.root
                );
                self.session.dataset = Some(dataset);
                self.session.classifier = Some(outcome.classifier);
                self.session.history = Some(outcome.history);
                self.session.committed = Some(committed);
                self.transition(EnrollState::Trained);
                Ok(history)
            }
            Err(EnrollError::Training(TrainingError::Cancelled(epoch))) => {
                self.cancel.reset();
                info!("Training cancelled at epoch {}", epoch);
                self.transition(EnrollState::Confirm);
                Err(TrainingError::Cancelled(epoch).into())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn create_proof(&mut self) -> Result<(), EnrollError> {
        self.require(self.session.state == EnrollState::Trained, "create_proof")?;
        self.transition(EnrollState::CreateProof);
        Ok(())
    }

    /// Build the proof request from the committed model and the most
    /// recent capture, signed with the wallet's key material
    pub fn authorize(&mut self, signing_key: SigningKey) -> Result<(), EnrollError> {
        self.require(self.session.state == EnrollState::CreateProof, "authorize")?;
        let built = match (
            &self.session.classifier,
            &self.session.committed,
            self.session.features.last(),
        ) {
            (Some(classifier), Some(committed), Some(features)) => self
                .quantizer
                .quantize_input(classifier, features)
                .and_then(|input| {
                    ProofRequest::build(
                        &self.config.proving,
                        committed.quantized.clone(),
                        input,
                        committed.commitment.clone(),
                        signing_key,
                    )
                }),
            _ => return Err(self.invalid("authorize")),
        };
        self.transition(EnrollState::CreatingAuthorization);

        match built {
            Ok(request) => {
                debug!("Proof request has {} record literals", request.inputs.len());
                self.session.proof_request = Some(request);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn fallback_available(&self) -> bool {
        self.session.proving_mode == ProvingMode::Delegated && self.config.proving.allow_local_fallback
    }

    fn prover_for(&self, mode: ProvingMode) -> Arc<dyn Prover> {
        match (mode, &self.delegated) {
            (ProvingMode::Delegated, Some(prover)) => prover.clone(),
            _ => self.local.clone(),
        }
    }

    /// Run the configured prover with bounded retries. A failure with a
    /// local fallback on offer keeps the session in GENERATING_PROOF.
    pub async fn generate_proof(&mut self) -> Result<ProofArtifact, EnrollError> {
        self.require(
            matches!(
                self.session.state,
                EnrollState::CreatingAuthorization | EnrollState::GeneratingProof
            ),
            "generate_proof",
        )?;
        let request = match self.session.proof_request.clone() {
            Some(request) => request,
            None => return Err(self.invalid("generate_proof")),
        };
        if self.session.state != EnrollState::GeneratingProof {
            self.transition(EnrollState::GeneratingProof);
        }

        let mode = self.session.proving_mode;
        let prover = self.prover_for(mode);
        self.session.retries.proving += 1;
        self.emit(EnrollmentEvent::ProofStarted {
            mode,
            expected_runtime_secs: self.config.proving.expected_runtime_secs,
        });

        let cancel = self.cancel.clone();
        let (req, handle) = (&request, &cancel);
        let outcome = retry_async(
            &self.config.proving.retry,
            move |attempt| {
                let prover = prover.clone();
                async move {
                    debug!("{} proving attempt {}", mode, attempt);
                    prover.prove(req, handle).await
                }
            },
            ProverError::is_retryable,
        )
        .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => {
                info!("Proof generated via {} proving after {} attempt(s)", mode, attempts);
                self.session.artifact = Some(value.clone());
                self.transition(EnrollState::ProofGenerated);
                Ok(value)
            }
            RetryOutcome::Exhausted { last_error: e, .. } | RetryOutcome::Fatal { error: e, .. } => {
                if e == ProverError::Cancelled {
                    self.cancel.reset();
                    info!("Proof generation cancelled");
                    return Err(e.into());
                }
                let fallback_available = self.fallback_available();
                self.emit(EnrollmentEvent::ProofFailed {
                    mode,
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                    fallback_available,
                });
                if fallback_available {
                    warn!("{} proving failed, local fallback available: {}", mode, e);
                    return Err(e.into());
                }
                Err(self.fail(e.into()))
            }
        }
    }

    /// Switch to local proving; the next `generate_proof` reuses the same request
    pub fn select_local_fallback(&mut self) -> Result<(), EnrollError> {
        self.require(
            self.session.state == EnrollState::GeneratingProof && self.fallback_available(),
            "select_local_fallback",
        )?;
        info!("Switching session {} to local proving", &self.session.id[..8]);
        self.session.proving_mode = ProvingMode::Local;
        self.emit(EnrollmentEvent::FallbackSelected);
        Ok(())
    }

    pub fn show_details(&mut self) -> Result<ProofArtifact, EnrollError> {
        self.require(self.session.state == EnrollState::ProofGenerated, "show_details")?;
        let artifact = match self.session.artifact.clone() {
            Some(artifact) => artifact,
            None => return Err(self.invalid("show_details")),
        };
        self.transition(EnrollState::ProofDetails);
        Ok(artifact)
    }

    /// Publish the commitment. Retryable failures return to PROOF_DETAILS
    /// until the registration policy runs out.
    pub async fn register(&mut self, address: &str) -> Result<TransactionId, EnrollError> {
        self.require(self.session.state == EnrollState::ProofDetails, "register")?;
        let commitment = match &self.session.committed {
            Some(committed) => committed.commitment.clone(),
            None => return Err(self.invalid("register")),
        };
        self.transition(EnrollState::Registering);
        self.session.retries.registration += 1;

        match self.registrar.register(address, &commitment).await {
            Ok(transaction) => {
                info!("Commitment {} registered in {}", commitment.root, transaction);
                self.session.transaction = Some(transaction.clone());
                self.emit(EnrollmentEvent::Registered {
                    transaction: transaction.clone(),
                });
                self.transition(EnrollState::Complete);
                Ok(transaction)
            }
            Err(e) => {
                let attempts_left = self
                    .config
                    .registration
                    .attempts()
                    .saturating_sub(self.session.retries.registration);
                if e.is_retryable() && attempts_left > 0 {
                    warn!("Registration failed ({} attempts left): {}", attempts_left, e);
                    self.emit(EnrollmentEvent::RegistrationFailed {
                        message: e.to_string(),
                        attempts_left,
                    });
                    self.transition(EnrollState::ProofDetails);
                    return Err(e.into());
                }
                Err(self.fail(e.into()))
            }
        }
    }

    /// Write the trained classifier and its commitment to a model bundle
    pub fn export_model(&self, path: impl AsRef<Path>) -> Result<ModelBundle, EnrollError> {
        let classifier = match &self.session.classifier {
            Some(classifier) => classifier,
            None => return Err(self.invalid("export_model")),
        };
        let commitment = self.session.committed.as_ref().map(|c| &c.commitment);
        Ok(storage::export(classifier, commitment, path)?)
    }

    /// Discard everything and start over at INITIAL; a preloaded baseline is
    /// loaded again
    pub fn reset(&mut self) -> Result<(), EnrollError> {
        self.device.release();
        self.cancel.reset();
        let from = self.session.state.clone();
        let mode = Self::initial_mode(&self.config, self.delegated.is_some());
        self.session.reset(mode);
        info!("Session reset from {}, new id {}", from, self.session.id);
        self.emit(EnrollmentEvent::StateChanged {
            from,
            to: EnrollState::Initial,
        });
        if let Some(sample) = self.baseline.clone() {
            self.preload(sample)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::negatives::tests::pool;
    use crate::augment::tests::signature_sample;
    use crate::error::ErrorKind;
    use crate::features::face_fixtures::{test_projection, textured_face, StubDetector};
    use crate::features::{FaceExtractor, SignatureExtractor};
    use crate::config::GuardConfig;
    use crate::guard::Signal;
    use crate::retry::RetryPolicy;
    use crate::sample::Architecture;
    use crate::zk::proof_fixtures::StubService;
    use crate::zk::ServiceResponse;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubDevice {
        frames: Mutex<VecDeque<Result<Sample, CaptureError>>>,
        releases: AtomicUsize,
    }

    impl StubDevice {
        fn new(frames: Vec<Result<Sample, CaptureError>>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames.into()),
                releases: AtomicUsize::new(0),
            })
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl CaptureDevice for StubDevice {
        fn acquire<'a>(&'a self, _modality: Modality) -> BoxFuture<'a, Result<Sample, CaptureError>> {
            let next = self
                .frames
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Unavailable("no more frames".into())));
            Box::pin(async move { next })
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubRegistrar {
        outcomes: Mutex<VecDeque<Result<TransactionId, RegistrarError>>>,
    }

    impl Registrar for StubRegistrar {
        fn register<'a>(
            &'a self,
            _address: &'a str,
            _commitment: &'a crate::zk::CommitmentHash,
        ) -> BoxFuture<'a, Result<TransactionId, RegistrarError>> {
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RegistrarError::Network("unreachable".into())));
            Box::pin(async move { next })
        }
    }

    fn registrar(outcomes: Vec<Result<TransactionId, RegistrarError>>) -> Arc<StubRegistrar> {
        Arc::new(StubRegistrar {
            outcomes: Mutex::new(outcomes.into()),
        })
    }

    /// Small enough to train in a test; guard thresholds stay at their defaults
    fn fast_config() -> EnrollmentConfig {
        let mut config = EnrollmentConfig::default();
        config.augment.variants_per_sample = 4;
        config.train.max_epochs = 60;
        config.train.patience = 10;
        config.proving.mode = ProvingMode::Local;
        config.proving.retry = RetryPolicy { max_attempts: 1, backoff_ms: 0 };
        config
    }

    fn signature_orchestrator(
        config: EnrollmentConfig,
        device: Arc<StubDevice>,
        collaborators: impl FnOnce(Collaborators) -> Collaborators,
        registrar: Arc<StubRegistrar>,
    ) -> (EnrollmentOrchestrator, mpsc::UnboundedReceiver<EnrollmentEvent>) {
        EnrollmentOrchestrator::new(
            config,
            Arc::new(SignatureExtractor::new()),
            pool(Modality::Signature, 60),
            collaborators(Collaborators::new(device, registrar)),
        )
        .unwrap()
    }

    fn signature_frames() -> Vec<Result<Sample, CaptureError>> {
        vec![Ok(signature_sample(0)), Ok(signature_sample(3)), Ok(signature_sample(6))]
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EnrollmentEvent>) -> Vec<EnrollmentEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn progress_count(events: &[EnrollmentEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, EnrollmentEvent::TrainingProgress(_)))
            .count()
    }

    async fn capture_all(orch: &mut EnrollmentOrchestrator, expected: &[EnrollState]) {
        for next in expected {
            assert_eq!(
                orch.capture().await.unwrap(),
                CaptureOutcome::Accepted { next: next.clone() }
            );
        }
    }

    #[tokio::test]
    async fn test_signature_enrollment_trains_expected_shape() {
        let device = StubDevice::new(signature_frames());
        let (mut orch, mut rx) = signature_orchestrator(fast_config(), device.clone(), |c| c, registrar(vec![]));

        capture_all(
            &mut orch,
            &[EnrollState::Repeat1, EnrollState::Repeat2, EnrollState::Confirm],
        )
        .await;
        orch.confirm().unwrap();
        let history = orch.train().await.unwrap();

        assert_eq!(orch.state(), &EnrollState::Trained);
        let classifier = orch.session().classifier.as_ref().unwrap();
        assert_eq!(
            classifier.model.architecture(),
            Architecture { input: 20, hidden: 11, output: 2 }
        );
        let lowest = history
            .records
            .iter()
            .map(|r| r.validation_loss)
            .fold(f64::INFINITY, f64::min);
        assert!(history.best_validation_loss <= lowest + 1e-6);
        assert!(orch.session().committed.is_some());
        assert_eq!(progress_count(&drain(&mut rx)), history.records.len());
        assert!(device.releases() >= 3);
    }

    #[tokio::test]
    async fn test_default_guard_rejects_recapture_and_keeps_distinct_strokes() {
        let frames = vec![
            Ok(signature_sample(0)),
            Ok(signature_sample(3)),
            Ok(signature_sample(0)),
            Ok(signature_sample(6)),
        ];
        let (mut orch, mut rx) = signature_orchestrator(fast_config(), StubDevice::new(frames), |c| c, registrar(vec![]));
        assert_eq!(orch.config().guard, GuardConfig::default());

        capture_all(&mut orch, &[EnrollState::Repeat1, EnrollState::Repeat2]).await;
        match orch.capture().await.unwrap() {
            CaptureOutcome::TooSimilar { reason, .. } => assert_eq!(reason, RejectReason::Hard(Signal::Descriptor)),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(orch.state(), &EnrollState::Repeat2);
        capture_all(&mut orch, &[EnrollState::Confirm]).await;

        orch.confirm().unwrap();
        orch.train().await.unwrap();
        assert_eq!(
            orch.session().classifier.as_ref().unwrap().model.architecture(),
            Architecture { input: 20, hidden: 11, output: 2 }
        );
        let events = drain(&mut rx);
        let accepted = events
            .iter()
            .filter(|e| matches!(e, EnrollmentEvent::CaptureAccepted { .. }))
            .count();
        let rejected = events
            .iter()
            .filter(|e| matches!(e, EnrollmentEvent::CaptureRejected { .. }))
            .count();
        assert_eq!((accepted, rejected), (3, 1));
    }

    #[tokio::test]
    async fn test_same_face_twice_rejected_in_repeat1() {
        let face = Sample::new(Modality::Face, textured_face(3));
        let device = StubDevice::new(vec![Ok(face.clone()), Ok(face.derive(face.raster.clone()))]);
        let extractor = FaceExtractor::new(Arc::new(StubDetector { landmarks: 68 }), test_projection()).unwrap();
        let (mut orch, mut rx) = EnrollmentOrchestrator::new(
            EnrollmentConfig::default(),
            Arc::new(extractor),
            pool(Modality::Face, 40),
            Collaborators::new(device, registrar(vec![])),
        )
        .unwrap();

        assert_eq!(
            orch.capture().await.unwrap(),
            CaptureOutcome::Accepted { next: EnrollState::Repeat1 }
        );
        match orch.capture().await.unwrap() {
            CaptureOutcome::TooSimilar { reason, .. } => {
                assert!(["descriptor", "canonical_ahash"].contains(&reason.name()));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(orch.state(), &EnrollState::Repeat1);
        assert_eq!(orch.session().samples.len(), 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EnrollmentEvent::CaptureRejected { .. })));
    }

    #[tokio::test]
    async fn test_delegated_timeout_falls_back_to_local() {
        let mut config = fast_config();
        config.proving.mode = ProvingMode::Delegated;
        let service = StubService {
            delay: Duration::from_secs(5),
            outcome: Ok(ServiceResponse { proof: "remote".into(), outputs: vec![] }),
        };
        let delegated = Arc::new(DelegatedProver::new(Arc::new(service), Duration::from_millis(20)));
        let (mut orch, mut rx) = signature_orchestrator(
            config,
            StubDevice::new(signature_frames()),
            |c| c.with_delegated_prover(delegated),
            registrar(vec![
                Err(RegistrarError::WalletRejected),
                Ok(TransactionId("at1enroll".into())),
            ]),
        );

        capture_all(
            &mut orch,
            &[EnrollState::Repeat1, EnrollState::Repeat2, EnrollState::Confirm],
        )
        .await;
        orch.confirm().unwrap();
        orch.train().await.unwrap();
        let trained_epochs = progress_count(&drain(&mut rx));
        let classifier = orch.session().classifier.clone();

        orch.create_proof().unwrap();
        orch.authorize(SigningKey::new("APrivateKey1enroll")).unwrap();
        let input = orch.session().proof_request.as_ref().unwrap().input.clone();

        let err = orch.generate_proof().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Proving);
        assert!(err.is_retryable());
        assert_eq!(orch.state(), &EnrollState::GeneratingProof);

        orch.select_local_fallback().unwrap();
        let artifact = orch.generate_proof().await.unwrap();
        assert_eq!(artifact.mode, ProvingMode::Local);
        assert_eq!(orch.state(), &EnrollState::ProofGenerated);
        assert_eq!(orch.session().proof_request.as_ref().unwrap().input, input);
        assert_eq!(orch.session().classifier, classifier);
        assert_eq!(progress_count(&drain(&mut rx)), 0);
        assert!(trained_epochs > 0);

        orch.show_details().unwrap();
        let err = orch.register("aleo1enroller").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(orch.state(), &EnrollState::ProofDetails);
        let tx = orch.register("aleo1enroller").await.unwrap();
        assert_eq!(tx, TransactionId("at1enroll".into()));
        assert_eq!(orch.state(), &EnrollState::Complete);
    }

    #[tokio::test]
    async fn test_proving_without_fallback_fails() {
        let mut config = fast_config();
        config.proving.mode = ProvingMode::Delegated;
        config.proving.allow_local_fallback = false;
        let service = StubService {
            delay: Duration::from_millis(1),
            outcome: Err(ProverError::Network("connection reset".into())),
        };
        let delegated = Arc::new(DelegatedProver::new(Arc::new(service), Duration::from_secs(1)));
        let (mut orch, _rx) = signature_orchestrator(
            config,
            StubDevice::new(signature_frames()),
            |c| c.with_delegated_prover(delegated),
            registrar(vec![]),
        );
        capture_all(
            &mut orch,
            &[EnrollState::Repeat1, EnrollState::Repeat2, EnrollState::Confirm],
        )
        .await;
        orch.confirm().unwrap();
        orch.train().await.unwrap();
        orch.create_proof().unwrap();
        orch.authorize(SigningKey::new("k")).unwrap();

        orch.generate_proof().await.unwrap_err();
        assert!(matches!(
            orch.state(),
            EnrollState::Failed { kind: ErrorKind::Proving, .. }
        ));
    }

    #[tokio::test]
    async fn test_baseline_skips_repeat2() {
        let device = StubDevice::new(vec![Ok(signature_sample(3)), Ok(signature_sample(6))]);
        let (mut orch, _rx) = signature_orchestrator(fast_config(), device, |c| c, registrar(vec![]));
        orch.with_baseline(signature_sample(0)).unwrap();

        capture_all(&mut orch, &[EnrollState::Repeat1, EnrollState::Confirm]).await;
        assert_eq!(orch.session().samples.len(), SAMPLES_REQUIRED);

        // Stepping back discards the REPEAT1 capture, never the baseline
        assert_eq!(orch.back().unwrap(), EnrollState::Repeat1);
        assert_eq!(orch.session().samples.len(), 2);
        orch.reset().unwrap();
        assert_eq!(orch.session().samples.len(), 1);
        assert_eq!(orch.session().preloaded, 1);
    }

    #[tokio::test]
    async fn test_back_releases_and_discards() {
        let device = StubDevice::new(signature_frames());
        let (mut orch, _rx) = signature_orchestrator(fast_config(), device.clone(), |c| c, registrar(vec![]));
        capture_all(&mut orch, &[EnrollState::Repeat1, EnrollState::Repeat2]).await;
        let released = device.releases();

        assert_eq!(orch.back().unwrap(), EnrollState::Repeat1);
        assert_eq!(device.releases(), released + 1);
        assert_eq!(orch.session().samples.len(), 1);
        assert_eq!(orch.session().guard.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_failures_bounded() {
        let mut config = fast_config();
        config.capture_attempts = 2;
        let device = StubDevice::new(vec![Err(CaptureError::Denied), Err(CaptureError::Denied)]);
        let (mut orch, _rx) = signature_orchestrator(config, device, |c| c, registrar(vec![]));

        let err = orch.capture().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(orch.state(), &EnrollState::Initial);
        orch.capture().await.unwrap_err();
        assert!(matches!(
            orch.state(),
            EnrollState::Failed { kind: ErrorKind::Capture, .. }
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_actions_rejected() {
        let (mut orch, _rx) = signature_orchestrator(
            fast_config(),
            StubDevice::new(vec![]),
            |c| c,
            registrar(vec![]),
        );
        assert!(matches!(
            orch.confirm(),
            Err(EnrollError::InvalidTransition { action: "confirm", .. })
        ));
        assert!(orch.train().await.is_err());
        assert!(orch.generate_proof().await.is_err());
        assert_eq!(orch.state(), &EnrollState::Initial);
    }

    #[tokio::test]
    async fn test_export_after_training() {
        let (mut orch, _rx) = signature_orchestrator(
            fast_config(),
            StubDevice::new(signature_frames()),
            |c| c,
            registrar(vec![]),
        );
        let path = std::env::temp_dir().join(format!("bioproof-session-{}.json", uuid::Uuid::new_v4()));
        assert!(orch.export_model(&path).is_err());

        capture_all(
            &mut orch,
            &[EnrollState::Repeat1, EnrollState::Repeat2, EnrollState::Confirm],
        )
        .await;
        orch.confirm().unwrap();
        orch.train().await.unwrap();
        let bundle = orch.export_model(&path).unwrap();
        assert_eq!(
            bundle.payload.commitment.as_ref(),
            orch.session().committed.as_ref().map(|c| &c.commitment)
        );
        let restored = storage::import(&path).unwrap().into_classifier();
        assert_eq!(Some(&restored), orch.session().classifier.as_ref());
        std::fs::remove_file(&path).ok();
    }
}
