//! Labeled examples, the seeded shuffle and the stratified split

use crate::sample::{FeatureVector, Modality};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binary class; the derived ordering fixes the label -> index mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Impostor,
    Genuine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: Label,
}

/// Linear congruential generator (Numerical Recipes constants, mod 2^32).
/// Used instead of a platform RNG so shuffles replay exactly for a seed.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: (seed ^ (seed >> 32)) as u32,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.state
    }

    /// Uniform in `[0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform index in `0..n`
    pub fn below(&mut self, n: usize) -> usize {
        ((self.next_f64() * n as f64) as usize).min(n.saturating_sub(1))
    }

    /// Fisher-Yates from the back
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}

/// Train and validation partitions
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub train: Vec<LabeledExample>,
    pub validation: Vec<LabeledExample>,
}

/// Ordered collection of labeled examples for one modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub modality: Modality,
    pub examples: Vec<LabeledExample>,
}

impl TrainingDataset {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            examples: Vec::new(),
        }
    }

    pub fn push(&mut self, features: FeatureVector, label: Label) {
        self.examples.push(LabeledExample { features, label });
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Distinct labels, ascending
    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.examples.iter().map(|e| e.label).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    pub fn count(&self, label: Label) -> usize {
        self.examples.iter().filter(|e| e.label == label).count()
    }

    /// Seeded shuffle of a copy of the examples
    pub fn shuffled(&self, seed: u64) -> Vec<LabeledExample> {
        let mut examples = self.examples.clone();
        Lcg::new(seed).shuffle(&mut examples);
        examples
    }

    pub fn save(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Split each label by `validation_ratio` so every class is represented in the
/// same proportion on both sides. Order within each side follows the input.
pub fn stratified_split(examples: Vec<LabeledExample>, validation_ratio: f64) -> Partition {
    let ratio = validation_ratio.clamp(0.0, 1.0);
    let mut totals: BTreeMap<Label, usize> = BTreeMap::new();
    for e in &examples {
        *totals.entry(e.label).or_insert(0) += 1;
    }
    let quotas: BTreeMap<Label, usize> = totals
        .iter()
        .map(|(&label, &n)| {
            let q = (n as f64 * ratio).round() as usize;
            // Keep at least one training example per class
            (label, q.min(n.saturating_sub(1)))
        })
        .collect();

    let mut taken: BTreeMap<Label, usize> = BTreeMap::new();
    let mut partition = Partition {
        train: Vec::new(),
        validation: Vec::new(),
    };
    for e in examples {
        let used = taken.entry(e.label).or_insert(0);
        if *used < quotas[&e.label] {
            *used += 1;
            partition.validation.push(e);
        } else {
            partition.train.push(e);
        }
    }
    partition
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(v: f64, label: Label) -> LabeledExample {
        LabeledExample {
            features: FeatureVector::new(Modality::Signature, vec![v; 20]).unwrap(),
            label,
        }
    }

    fn dataset(n_pos: usize, n_neg: usize) -> TrainingDataset {
        let mut ds = TrainingDataset::new(Modality::Signature);
        for i in 0..n_pos {
            ds.examples.push(example(i as f64, Label::Genuine));
        }
        for i in 0..n_neg {
            ds.examples.push(example(-(i as f64) - 1.0, Label::Impostor));
        }
        ds
    }

    #[test]
    fn test_lcg_replays() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        let xs: Vec<u32> = (0..10).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..10).map(|_| b.next_u32()).collect();
        assert_eq!(xs, ys);
        assert_ne!(Lcg::new(1).next_u32(), Lcg::new(2).next_u32());
    }

    #[test]
    fn test_lcg_known_sequence() {
        let mut rng = Lcg::new(0);
        assert_eq!(rng.next_u32(), 1_013_904_223);
        assert_eq!(rng.next_u32(), 1_196_435_762);
    }

    #[test]
    fn test_shuffle_is_permutation_and_deterministic() {
        let ds = dataset(10, 10);
        let a = ds.shuffled(7);
        let b = ds.shuffled(7);
        assert_eq!(a, b);
        assert_ne!(a, ds.examples);
        let mut sorted: Vec<f64> = a.iter().map(|e| e.features.values()[0]).collect();
        sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
        let mut orig: Vec<f64> = ds.examples.iter().map(|e| e.features.values()[0]).collect();
        orig.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(sorted, orig);
    }

    #[test]
    fn test_stratified_split_proportions() {
        let ds = dataset(20, 30);
        let part = stratified_split(ds.shuffled(3), 0.2);
        let val_pos = part.validation.iter().filter(|e| e.label == Label::Genuine).count();
        let val_neg = part.validation.iter().filter(|e| e.label == Label::Impostor).count();
        assert_eq!(val_pos, 4);
        assert_eq!(val_neg, 6);
        assert_eq!(part.train.len(), 40);
    }

    #[test]
    fn test_split_keeps_training_example() {
        let ds = dataset(1, 1);
        let part = stratified_split(ds.examples, 0.9);
        assert_eq!(part.train.len(), 2);
        assert!(part.validation.is_empty());
    }

    #[test]
    fn test_labels_sorted() {
        let ds = dataset(2, 2);
        assert_eq!(ds.labels(), vec![Label::Impostor, Label::Genuine]);
        assert_eq!(ds.count(Label::Genuine), 2);
    }
}
