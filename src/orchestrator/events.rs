use super::collaborators::TransactionId;
use super::state::EnrollState;
use crate::error::ErrorKind;
use crate::guard::RejectReason;
use crate::train::EpochRecord;
use crate::zk::ProvingMode;
use serde::{Deserialize, Serialize};

/// Everything the presentation layer is told about a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EnrollmentEvent {
    StateChanged {
        from: EnrollState,
        to: EnrollState,
    },
    CaptureAccepted {
        sample_id: String,
        accepted: usize,
    },
    CaptureRejected {
        reason: RejectReason,
        guidance: String,
    },
    CaptureFailed {
        message: String,
        attempts_left: u32,
    },
    TrainingProgress(EpochRecord),
    ProofStarted {
        mode: ProvingMode,
        expected_runtime_secs: u64,
    },
    ProofFailed {
        mode: ProvingMode,
        message: String,
        retryable: bool,
        fallback_available: bool,
    },
    FallbackSelected,
    RegistrationFailed {
        message: String,
        attempts_left: u32,
    },
    Registered {
        transaction: TransactionId,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}
