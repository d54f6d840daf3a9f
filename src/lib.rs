//! BioProof: on-device biometric enrollment with verifiable model commitments
//!
//! A handful of signature or face captures become a tiny genuine/impostor
//! classifier whose fixed-point parameters are committed to with a chunked
//! hash an external verifier can recompute bit for bit.

pub mod augment;
pub mod cancel;
pub mod config;
pub mod error;
pub mod features;
pub mod guard;
pub mod orchestrator;
pub mod raster;
pub mod retry;
pub mod sample;
pub mod storage;
pub mod train;
pub mod zk;

pub use config::EnrollmentConfig;
pub use error::{EnrollError, ErrorKind};
pub use features::{FaceExtractor, FeatureExtractor, SignatureExtractor};
pub use guard::DuplicateGuard;
pub use orchestrator::{EnrollState, EnrollmentEvent, EnrollmentOrchestrator};
pub use sample::{FeatureVector, Modality, Sample};
pub use storage::ModelBundle;
pub use train::{Classifier, TrainedModel};
pub use zk::{CommitmentHash, QuantizerHasher};
