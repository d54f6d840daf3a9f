//! Trainer: deterministic training of the per-modality perceptron
//!
//! The dataset is shuffled with a seeded LCG, split per label, standardised
//! with a scaler fit on the train side only, and trained with Adam one epoch
//! at a time. The best validation snapshot is what gets returned.

pub mod classifier;
pub mod dataset;
pub mod mlp;
pub mod scaler;
pub mod trainer;

pub use classifier::{Classifier, Prediction};
pub use dataset::{stratified_split, Label, LabeledExample, Lcg, Partition, TrainingDataset};
pub use mlp::{Adam, TrainedModel};
pub use scaler::StandardScaler;
pub use trainer::{prepare, train, EpochRecord, PreparedData, TrainConfig, TrainHistory, TrainOutcome, TrainingError};
