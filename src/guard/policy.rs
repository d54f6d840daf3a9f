//! Decision policy: hard single-signal bound or soft corroborated bound

use super::scorer::Signal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Distance bounds for one signal; `soft` is the looser of the two
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub hard: f64,
    pub soft: f64,
}

/// Per-modality threshold set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardThresholds {
    pub descriptor: SignalThresholds,
    pub canonical_ahash: SignalThresholds,
    /// Signals that must agree within `soft` to reject without a hard hit
    pub corroboration: usize,
}

impl GuardThresholds {
    /// Face descriptors (128-d embeddings) and 256-bit hashes
    pub fn face() -> Self {
        Self {
            descriptor: SignalThresholds { hard: 0.25, soft: 0.28 },
            canonical_ahash: SignalThresholds { hard: 20.0, soft: 23.0 },
            corroboration: 2,
        }
    }

    /// Signature feature vectors and stroke hashes
    pub fn signature() -> Self {
        Self {
            descriptor: SignalThresholds { hard: 0.10, soft: 0.115 },
            canonical_ahash: SignalThresholds { hard: 16.0, soft: 18.0 },
            corroboration: 2,
        }
    }

    pub fn for_signal(&self, signal: Signal) -> SignalThresholds {
        match signal {
            Signal::Descriptor => self.descriptor,
            Signal::CanonicalAhash => self.canonical_ahash,
        }
    }
}

/// Minimum distance of one signal against all baselines
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub signal: Signal,
    /// `None` when the signal could not be computed
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule", content = "signals")]
pub enum RejectReason {
    /// A single signal at or below its hard bound
    Hard(Signal),
    /// Several signals at or below their soft bounds at once
    Corroborated(Vec<Signal>),
}

impl RejectReason {
    pub fn name(&self) -> &'static str {
        match self {
            RejectReason::Hard(signal) => signal.name(),
            RejectReason::Corroborated(_) => "corroborated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept { scores: Vec<SignalScore> },
    TooSimilar { reason: RejectReason, scores: Vec<SignalScore> },
}

impl Verdict {
    pub fn is_too_similar(&self) -> bool {
        matches!(self, Verdict::TooSimilar { .. })
    }

    pub fn scores(&self) -> &[SignalScore] {
        match self {
            Verdict::Accept { scores } | Verdict::TooSimilar { scores, .. } => scores,
        }
    }
}

/// Combines signal scores into a verdict; unavailable signals are ignored
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    thresholds: BTreeMap<Signal, SignalThresholds>,
    corroboration: usize,
}

impl DecisionPolicy {
    pub fn new(thresholds: &GuardThresholds) -> Self {
        let mut map = BTreeMap::new();
        map.insert(Signal::Descriptor, thresholds.descriptor);
        map.insert(Signal::CanonicalAhash, thresholds.canonical_ahash);
        Self {
            thresholds: map,
            corroboration: thresholds.corroboration.max(2),
        }
    }

    pub fn with_signal(mut self, signal: Signal, bounds: SignalThresholds) -> Self {
        self.thresholds.insert(signal, bounds);
        self
    }

    pub fn decide(&self, scores: Vec<SignalScore>) -> Verdict {
        let available: Vec<(Signal, f64, SignalThresholds)> = scores
            .iter()
            .filter_map(|s| {
                let bounds = self.thresholds.get(&s.signal)?;
                s.distance.map(|d| (s.signal, d, *bounds))
            })
            .collect();

        if let Some((signal, _, _)) = available.iter().find(|(_, d, b)| *d <= b.hard) {
            return Verdict::TooSimilar { reason: RejectReason::Hard(*signal), scores };
        }

        let soft: Vec<Signal> = available
            .iter()
            .filter(|(_, d, b)| *d <= b.soft)
            .map(|(s, _, _)| *s)
            .collect();
        if soft.len() >= self.corroboration {
            return Verdict::TooSimilar { reason: RejectReason::Corroborated(soft), scores };
        }

        Verdict::Accept { scores }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(descriptor: Option<f64>, ahash: Option<f64>) -> Vec<SignalScore> {
        vec![
            SignalScore { signal: Signal::Descriptor, distance: descriptor },
            SignalScore { signal: Signal::CanonicalAhash, distance: ahash },
        ]
    }

    fn policy() -> DecisionPolicy {
        DecisionPolicy::new(&GuardThresholds::face())
    }

    #[test]
    fn test_hard_descriptor() {
        let v = policy().decide(scores(Some(0.1), Some(200.0)));
        assert!(matches!(v, Verdict::TooSimilar { reason: RejectReason::Hard(Signal::Descriptor), .. }));
    }

    #[test]
    fn test_hard_hash() {
        let v = policy().decide(scores(Some(0.9), Some(3.0)));
        match v {
            Verdict::TooSimilar { reason, .. } => assert_eq!(reason.name(), "canonical_ahash"),
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_single_soft_signal_is_not_enough() {
        assert!(!policy().decide(scores(Some(0.27), Some(100.0))).is_too_similar());
        assert!(!policy().decide(scores(Some(0.27), None)).is_too_similar());
    }

    #[test]
    fn test_corroborated_soft_signals() {
        let v = policy().decide(scores(Some(0.27), Some(22.0)));
        assert!(matches!(v, Verdict::TooSimilar { reason: RejectReason::Corroborated(_), .. }));
    }

    #[test]
    fn test_beyond_soft_on_both_accepts() {
        let v = policy().decide(scores(Some(0.29), Some(24.0)));
        assert!(!v.is_too_similar());
        assert_eq!(v.scores().len(), 2);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(policy().decide(scores(Some(0.25), None)).is_too_similar());
    }

    #[test]
    fn test_unavailable_signals_accept() {
        assert!(!policy().decide(scores(None, None)).is_too_similar());
    }
}
