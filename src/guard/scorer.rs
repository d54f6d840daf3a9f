//! Similarity signals behind one `Scorer` abstraction

use super::canonical::hamming;
use super::DuplicateBaseline;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a similarity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Descriptor,
    CanonicalAhash,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Descriptor => "descriptor",
            Signal::CanonicalAhash => "canonical_ahash",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A distance between two baselines; `None` when either side lacks the signal
pub trait Scorer: Send + Sync {
    fn signal(&self) -> Signal;

    fn score(&self, a: &DuplicateBaseline, b: &DuplicateBaseline) -> Option<f64>;
}

/// Euclidean distance between descriptors
#[derive(Debug, Clone, Default)]
pub struct DescriptorScorer;

impl Scorer for DescriptorScorer {
    fn signal(&self) -> Signal {
        Signal::Descriptor
    }

    fn score(&self, a: &DuplicateBaseline, b: &DuplicateBaseline) -> Option<f64> {
        let (a, b) = (a.descriptor.as_ref()?, b.descriptor.as_ref()?);
        if a.len() != b.len() {
            return None;
        }
        let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
        Some(sq.sqrt())
    }
}

/// Hamming distance between pose-normalised average hashes
#[derive(Debug, Clone, Default)]
pub struct CanonicalHashScorer;

impl Scorer for CanonicalHashScorer {
    fn signal(&self) -> Signal {
        Signal::CanonicalAhash
    }

    fn score(&self, a: &DuplicateBaseline, b: &DuplicateBaseline) -> Option<f64> {
        hamming(a.ahash.as_ref()?, b.ahash.as_ref()?).map(|d| d as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(descriptor: Option<Vec<f64>>, ahash: Option<Vec<bool>>) -> DuplicateBaseline {
        DuplicateBaseline { descriptor, ahash }
    }

    #[test]
    fn test_descriptor_distance() {
        let a = baseline(Some(vec![0.0, 0.0]), None);
        let b = baseline(Some(vec![3.0, 4.0]), None);
        assert_eq!(DescriptorScorer.score(&a, &b), Some(5.0));
        assert_eq!(CanonicalHashScorer.score(&a, &b), None);
    }

    #[test]
    fn test_hash_distance() {
        let a = baseline(None, Some(vec![true, true, false]));
        let b = baseline(None, Some(vec![false, true, true]));
        assert_eq!(CanonicalHashScorer.score(&a, &b), Some(2.0));
        assert_eq!(DescriptorScorer.score(&a, &b), None);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::CanonicalAhash.to_string(), "canonical_ahash");
        assert_eq!(serde_json::to_string(&Signal::Descriptor).unwrap(), "\"descriptor\"");
    }
}
