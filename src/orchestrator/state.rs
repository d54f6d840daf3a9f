use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Enrollment state machine positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "state")]
pub enum EnrollState {
    Initial,
    Repeat1,
    Repeat2,
    Confirm,
    Training,
    Trained,
    CreateProof,
    CreatingAuthorization,
    GeneratingProof,
    ProofGenerated,
    ProofDetails,
    Registering,
    Complete,
    Failed { kind: ErrorKind, message: String },
}

impl EnrollState {
    /// States in which a capture is expected
    pub fn is_capture(&self) -> bool {
        matches!(self, EnrollState::Initial | EnrollState::Repeat1 | EnrollState::Repeat2)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollState::Complete | EnrollState::Failed { .. })
    }

    /// Capture step that collects the `n`th session capture (0-based)
    pub fn capture_step(n: usize) -> Self {
        match n {
            0 => EnrollState::Initial,
            1 => EnrollState::Repeat1,
            _ => EnrollState::Repeat2,
        }
    }
}

impl fmt::Display for EnrollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnrollState::Initial => "INITIAL",
            EnrollState::Repeat1 => "REPEAT1",
            EnrollState::Repeat2 => "REPEAT2",
            EnrollState::Confirm => "CONFIRM",
            EnrollState::Training => "TRAINING",
            EnrollState::Trained => "TRAINED",
            EnrollState::CreateProof => "CREATE_PROOF",
            EnrollState::CreatingAuthorization => "CREATING_AUTHORIZATION",
            EnrollState::GeneratingProof => "GENERATING_PROOF",
            EnrollState::ProofGenerated => "PROOF_GENERATED",
            EnrollState::ProofDetails => "PROOF_DETAILS",
            EnrollState::Registering => "REGISTERING",
            EnrollState::Complete => "COMPLETE",
            EnrollState::Failed { kind, .. } => return write!(f, "FAILED({})", kind),
        };
        f.write_str(name)
    }
}
