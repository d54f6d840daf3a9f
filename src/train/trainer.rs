//! Training loop: seeded shuffle, stratified split, scaler fit, Adam epochs,
//! best-snapshot early stopping.

use super::classifier::Classifier;
use super::dataset::{stratified_split, Label, LabeledExample, Lcg, Partition, TrainingDataset};
use super::mlp::{Adam, Gradients, TrainedModel};
use super::scaler::StandardScaler;
use crate::sample::Modality;
use log::info;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrainingError {
    #[error("training dataset is empty")]
    EmptyDataset,
    #[error("training needs two classes, dataset only has {0:?}")]
    SingleClass(Vec<Label>),
    #[error("example {index} is a {actual} vector but the dataset is {expected}")]
    ModalityMismatch {
        index: usize,
        expected: Modality,
        actual: Modality,
    },
    #[error("example {index} has {actual} features, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("example {index} contains non-finite features")]
    NonFinite { index: usize },
    #[error("{0} partition is empty after the split")]
    EmptyPartition(&'static str),
    #[error("training diverged at epoch {0}")]
    Diverged(u32),
    #[error("training cancelled at epoch {0}")]
    Cancelled(u32),
}

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Seeds the dataset shuffle, weight init and batch order
    pub seed: u64,
    pub validation_ratio: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_epochs: u32,
    /// Stop after this many epochs without validation improvement (0 disables)
    pub patience: u32,
    /// Minimum improvement to reset patience counter
    pub min_delta: f64,
    /// Log every N epochs
    pub log_interval: u32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            validation_ratio: 0.2,
            learning_rate: 0.01,
            batch_size: 16,
            max_epochs: 200,
            patience: 15,
            min_delta: 1e-6,
            log_interval: 10,
        }
    }
}

/// Record of a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u32,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub validation_loss: f64,
    pub validation_accuracy: f64,
}

/// Complete training history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainHistory {
    pub records: Vec<EpochRecord>,
    pub best_validation_loss: f64,
    pub best_epoch: u32,
    pub stopped_early: bool,
}

/// Dataset after label mapping, shuffle, split and scaler fit
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Index `i` of the output layer is `labels[i]`
    pub labels: Vec<Label>,
    pub shuffled: Vec<LabeledExample>,
    pub partition: Partition,
    pub scaler: StandardScaler,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub classifier: Classifier,
    pub history: TrainHistory,
}

fn validate(dataset: &TrainingDataset) -> Result<(), TrainingError> {
    if dataset.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    let expected = dataset.modality.feature_dim();
    for (index, example) in dataset.examples.iter().enumerate() {
        let features = &example.features;
        if features.modality() != dataset.modality {
            return Err(TrainingError::ModalityMismatch {
                index,
                expected: dataset.modality,
                actual: features.modality(),
            });
        }
        if features.len() != expected {
            return Err(TrainingError::DimensionMismatch {
                index,
                expected,
                actual: features.len(),
            });
        }
        if !features.is_finite() {
            return Err(TrainingError::NonFinite { index });
        }
    }
    Ok(())
}

/// Everything up to (and including) the scaler fit. Deterministic in
/// `config.seed`.
pub fn prepare(dataset: &TrainingDataset, config: &TrainConfig) -> Result<PreparedData, TrainingError> {
    validate(dataset)?;
    let labels = dataset.labels();
    if labels.len() < 2 {
        return Err(TrainingError::SingleClass(labels));
    }

    let shuffled = dataset.shuffled(config.seed);
    let partition = stratified_split(shuffled.clone(), config.validation_ratio);
    if partition.train.is_empty() {
        return Err(TrainingError::EmptyPartition("train"));
    }
    if partition.validation.is_empty() {
        return Err(TrainingError::EmptyPartition("validation"));
    }

    let rows: Vec<&[f64]> = partition.train.iter().map(|e| e.features.values()).collect();
    let scaler = StandardScaler::fit(&rows).ok_or(TrainingError::EmptyPartition("train"))?;

    Ok(PreparedData {
        labels,
        shuffled,
        partition,
        scaler,
    })
}

fn encode(
    examples: &[LabeledExample],
    labels: &[Label],
    scaler: &StandardScaler,
) -> Vec<(DVector<f64>, usize)> {
    examples
        .iter()
        .filter_map(|e| {
            let target = labels.iter().position(|l| *l == e.label)?;
            Some((scaler.transform_vector(e.features.values()), target))
        })
        .collect()
}

/// Mean cross-entropy and accuracy
fn evaluate(model: &TrainedModel, data: &[(DVector<f64>, usize)]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let mut loss = 0.0;
    let mut correct = 0usize;
    for (x, target) in data {
        let p = model.predict_proba(x);
        loss -= p[*target].max(1e-12).ln();
        if p.argmax().0 == *target {
            correct += 1;
        }
    }
    let n = data.len() as f64;
    (loss / n, correct as f64 / n)
}

/// Train a classifier on `dataset`. `progress` is called after every epoch;
/// returning `ControlFlow::Break` cancels the run.
pub fn train<F>(
    dataset: &TrainingDataset,
    config: &TrainConfig,
    mut progress: F,
) -> Result<TrainOutcome, TrainingError>
where
    F: FnMut(&EpochRecord) -> ControlFlow<()>,
{
    let prepared = prepare(dataset, config)?;
    let train_set = encode(&prepared.partition.train, &prepared.labels, &prepared.scaler);
    let validation_set = encode(&prepared.partition.validation, &prepared.labels, &prepared.scaler);

    let mut rng = Lcg::new(config.seed.wrapping_add(1));
    let mut model = TrainedModel::initialize(dataset.modality, &mut rng);
    let arch = model.architecture();
    let mut optimizer = Adam::new(&arch, config.learning_rate);
    let batch_size = config.batch_size.max(1);

    info!(
        "Training {} classifier {:?} on {} examples ({} train / {} validation) | lr={:.4} | max_epochs={}",
        dataset.modality,
        (arch.input, arch.hidden, arch.output),
        dataset.len(),
        train_set.len(),
        validation_set.len(),
        config.learning_rate,
        config.max_epochs,
    );

    let mut records = Vec::new();
    let mut best_loss = f64::MAX;
    let mut best_epoch = 0u32;
    let mut best_model = model.clone();
    let mut patience_counter = 0u32;
    let mut stopped_early = false;
    let mut order: Vec<usize> = (0..train_set.len()).collect();

    for epoch in 0..config.max_epochs {
        rng.shuffle(&mut order);
        for batch in order.chunks(batch_size) {
            let mut grads = Gradients::zeros(&arch);
            for &i in batch {
                let (x, target) = &train_set[i];
                let (_, g) = model.backward(x, *target);
                grads.accumulate(&g);
            }
            grads.scale(1.0 / batch.len() as f64);
            optimizer.step(&mut model, &grads);
        }

        if !model.is_finite() {
            return Err(TrainingError::Diverged(epoch));
        }

        let (train_loss, train_accuracy) = evaluate(&model, &train_set);
        let (validation_loss, validation_accuracy) = evaluate(&model, &validation_set);
        let record = EpochRecord {
            epoch,
            train_loss,
            train_accuracy,
            validation_loss,
            validation_accuracy,
        };

        if validation_loss < best_loss - config.min_delta {
            best_loss = validation_loss;
            best_epoch = epoch;
            best_model = model.clone();
            patience_counter = 0;
        } else {
            patience_counter += 1;
        }

        if config.log_interval > 0 && epoch % config.log_interval == 0 {
            info!(
                "  epoch={:>4} | train_loss={:.6} acc={:.3} | val_loss={:.6} acc={:.3}",
                epoch, train_loss, train_accuracy, validation_loss, validation_accuracy
            );
        }

        let flow = progress(&record);
        records.push(record);
        if flow.is_break() {
            info!("  Training cancelled at epoch {}", epoch);
            return Err(TrainingError::Cancelled(epoch));
        }

        if config.patience > 0 && patience_counter >= config.patience {
            info!("  Early stopping at epoch {} (no improvement for {} epochs)", epoch, config.patience);
            stopped_early = true;
            break;
        }
    }

    info!(
        "Training complete: best_val_loss={:.6} at epoch {} | {} epochs run",
        best_loss,
        best_epoch,
        records.len()
    );

    Ok(TrainOutcome {
        classifier: Classifier::new(best_model, prepared.scaler, prepared.labels),
        history: TrainHistory {
            records,
            best_validation_loss: best_loss,
            best_epoch,
            stopped_early,
        },
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sample::FeatureVector;

    /// Two noisy clusters, genuine around +1 and impostor around -1
    pub fn separable(modality: Modality, per_class: usize, seed: u64) -> TrainingDataset {
        let mut rng = Lcg::new(seed);
        let dim = modality.feature_dim();
        let mut ds = TrainingDataset::new(modality);
        for i in 0..per_class * 2 {
            let (label, centre) = if i % 2 == 0 {
                (Label::Genuine, 1.0)
            } else {
                (Label::Impostor, -1.0)
            };
            let values = (0..dim).map(|_| centre + (rng.next_f64() - 0.5) * 0.8).collect();
            ds.push(FeatureVector::new(modality, values).unwrap(), label);
        }
        ds
    }

    fn quiet(max_epochs: u32) -> TrainConfig {
        TrainConfig {
            max_epochs,
            log_interval: 0,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_trains_signature_shape() {
        let ds = separable(Modality::Signature, 30, 1);
        let outcome = train(&ds, &quiet(60), |_| ControlFlow::Continue(())).unwrap();
        let model = &outcome.classifier.model;
        assert!(model.matches(&Modality::Signature.architecture()));
        let last = outcome.history.records.last().unwrap();
        assert!(last.validation_accuracy >= 0.9);
    }

    #[test]
    fn test_face_uses_wider_hidden_layer() {
        let ds = separable(Modality::Face, 20, 2);
        let outcome = train(&ds, &quiet(20), |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(outcome.classifier.model.architecture().hidden, 17);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let ds = separable(Modality::Signature, 15, 3);
        let config = quiet(25);
        let a = prepare(&ds, &config).unwrap();
        let b = prepare(&ds, &config).unwrap();
        assert_eq!(a.shuffled, b.shuffled);
        let ma = train(&ds, &config, |_| ControlFlow::Continue(())).unwrap();
        let mb = train(&ds, &config, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(ma.classifier.model, mb.classifier.model);
        assert_eq!(ma.history, mb.history);
    }

    #[test]
    fn test_best_snapshot_restored() {
        let ds = separable(Modality::Signature, 20, 4);
        let config = TrainConfig {
            patience: 4,
            min_delta: 0.0,
            ..quiet(300)
        };
        let outcome = train(&ds, &config, |_| ControlFlow::Continue(())).unwrap();
        let history = &outcome.history;
        let min = history
            .records
            .iter()
            .map(|r| r.validation_loss)
            .fold(f64::MAX, f64::min);
        assert_eq!(history.best_validation_loss, min);
        if history.stopped_early {
            assert_eq!(history.records.len() as u32 - 1 - history.best_epoch, config.patience);
        } else {
            assert_eq!(history.records.len() as u32, config.max_epochs);
        }

        // The returned model is the snapshot, not the final epoch's weights
        let prepared = prepare(&ds, &config).unwrap();
        let validation = encode(&prepared.partition.validation, &prepared.labels, &prepared.scaler);
        let (loss, _) = evaluate(&outcome.classifier.model, &validation);
        assert!((loss - history.best_validation_loss).abs() < 1e-12);
    }

    #[test]
    fn test_progress_every_epoch_and_cancel() {
        let ds = separable(Modality::Signature, 10, 5);
        let mut seen = Vec::new();
        let err = train(&ds, &TrainConfig { patience: 0, ..quiet(50) }, |r| {
            seen.push(r.epoch);
            if r.epoch == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap_err();
        assert_eq!(err, TrainingError::Cancelled(2));
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_class_rejected() {
        let mut ds = TrainingDataset::new(Modality::Signature);
        for _ in 0..5 {
            ds.push(FeatureVector::new(Modality::Signature, vec![1.0; 20]).unwrap(), Label::Genuine);
        }
        assert_eq!(
            prepare(&ds, &TrainConfig::default()).unwrap_err(),
            TrainingError::SingleClass(vec![Label::Genuine])
        );
        assert_eq!(
            prepare(&TrainingDataset::new(Modality::Face), &TrainConfig::default()).unwrap_err(),
            TrainingError::EmptyDataset
        );
    }

    #[test]
    fn test_malformed_dimensions_fatal() {
        let mut ds = separable(Modality::Signature, 5, 6);
        let bad: FeatureVector =
            serde_json::from_str(r#"{"modality":"signature","values":[1.0,2.0]}"#).unwrap();
        ds.push(bad, Label::Genuine);
        assert_eq!(
            prepare(&ds, &TrainConfig::default()).unwrap_err(),
            TrainingError::DimensionMismatch { index: 10, expected: 20, actual: 2 }
        );

        let face = separable(Modality::Face, 2, 7);
        ds.examples.truncate(10);
        ds.examples.push(face.examples[0].clone());
        assert!(matches!(
            prepare(&ds, &TrainConfig::default()),
            Err(TrainingError::ModalityMismatch { index: 10, .. })
        ));
    }

    #[test]
    fn test_empty_validation_partition_fatal() {
        let ds = separable(Modality::Signature, 5, 8);
        let config = TrainConfig { validation_ratio: 0.0, ..quiet(5) };
        assert_eq!(prepare(&ds, &config).unwrap_err(), TrainingError::EmptyPartition("validation"));
    }
}
