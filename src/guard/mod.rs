//! Duplicate guard: rejects captures too close to one already accepted
//!
//! Each accepted capture leaves a `DuplicateBaseline`. A new capture is scored
//! against every baseline by each `Scorer`; the minimum distance per signal is
//! handed to the `DecisionPolicy`.

pub mod canonical;
mod policy;
mod scorer;

pub use policy::{DecisionPolicy, GuardThresholds, RejectReason, SignalScore, SignalThresholds, Verdict};
pub use scorer::{CanonicalHashScorer, DescriptorScorer, Scorer, Signal};

use crate::features::Extraction;
use crate::sample::{Modality, Sample};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Similarity-only summary of an accepted capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateBaseline {
    pub descriptor: Option<Vec<f64>>,
    pub ahash: Option<Vec<bool>>,
}

impl DuplicateBaseline {
    pub fn from_extraction(sample: &Sample, extraction: &Extraction) -> Self {
        let luma = sample.raster.luma();
        let ahash = match (sample.modality, &extraction.landmarks) {
            (Modality::Face, Some(landmarks)) => canonical::canonical_ahash(&luma, landmarks),
            (Modality::Face, None) => None,
            (Modality::Signature, _) => canonical::stroke_ahash(&luma),
        };
        Self {
            descriptor: extraction.descriptor.clone(),
            ahash,
        }
    }
}

/// Session-scoped guard holding the accepted baselines
pub struct DuplicateGuard {
    policy: DecisionPolicy,
    scorers: Vec<Box<dyn Scorer>>,
    baselines: Vec<DuplicateBaseline>,
}

impl DuplicateGuard {
    pub fn new(thresholds: &GuardThresholds) -> Self {
        Self::with_scorers(
            DecisionPolicy::new(thresholds),
            vec![Box::new(DescriptorScorer), Box::new(CanonicalHashScorer)],
        )
    }

    pub fn with_scorers(policy: DecisionPolicy, scorers: Vec<Box<dyn Scorer>>) -> Self {
        Self {
            policy,
            scorers,
            baselines: Vec::new(),
        }
    }

    /// Score a candidate against every accepted baseline
    pub fn check(&self, candidate: &DuplicateBaseline) -> Verdict {
        if self.baselines.is_empty() {
            return Verdict::Accept { scores: Vec::new() };
        }
        let scores: Vec<SignalScore> = self
            .scorers
            .iter()
            .map(|scorer| {
                let distance = self
                    .baselines
                    .iter()
                    .filter_map(|b| scorer.score(candidate, b))
                    .fold(None, |min: Option<f64>, d| Some(min.map_or(d, |m| m.min(d))));
                if distance.is_none() {
                    warn!("Duplicate signal '{}' unavailable for this capture", scorer.signal());
                }
                SignalScore { signal: scorer.signal(), distance }
            })
            .collect();

        let verdict = self.policy.decide(scores);
        debug!("Duplicate check against {} baselines: {:?}", self.baselines.len(), verdict);
        verdict
    }

    pub fn accept(&mut self, baseline: DuplicateBaseline) {
        self.baselines.push(baseline);
    }

    /// Drop the most recent baseline (stepping back discards that capture)
    pub fn pop(&mut self) -> Option<DuplicateBaseline> {
        self.baselines.pop()
    }

    pub fn clear(&mut self) {
        self.baselines.clear();
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn baselines(&self) -> &[DuplicateBaseline] {
        &self.baselines
    }
}
