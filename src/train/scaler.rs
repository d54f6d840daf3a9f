//! Per-feature standardisation fit on the training partition

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation; zeros are stored as one
    pub std: Vec<f64>,
}

impl StandardScaler {
    /// Fit on row vectors of equal length; `None` for an empty set
    pub fn fit(rows: &[&[f64]]) -> Option<Self> {
        let first = rows.first()?;
        let dim = first.len();
        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; dim];
        for row in rows {
            for ((s, v), m) in std.iter_mut().zip(row.iter()).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        let std = std
            .into_iter()
            .map(|var| {
                let s = var.sqrt();
                if s == 0.0 || !s.is_finite() {
                    1.0
                } else {
                    s
                }
            })
            .collect();
        Some(Self { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform_vector(&self, values: &[f64]) -> DVector<f64> {
        DVector::from_vec(self.transform(values))
    }
}
