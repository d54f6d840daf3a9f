//! Single hidden-layer perceptron: ReLU hidden, softmax output, Adam updates

use super::dataset::Lcg;
use crate::sample::{Architecture, Modality};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Trained parameters: `w1` is hidden x input, `w2` is output x hidden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub modality: Modality,
    pub w1: DMatrix<f64>,
    pub b1: DVector<f64>,
    pub w2: DMatrix<f64>,
    pub b2: DVector<f64>,
}

/// Intermediate values of one forward pass
pub struct Forward {
    pub z1: DVector<f64>,
    pub hidden: DVector<f64>,
    pub logits: DVector<f64>,
    pub probabilities: DVector<f64>,
}

pub fn softmax(logits: &DVector<f64>) -> DVector<f64> {
    let max = logits.max();
    let exp = logits.map(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

impl TrainedModel {
    /// Xavier-uniform weights drawn from the LCG, zero biases
    pub fn initialize(modality: Modality, rng: &mut Lcg) -> Self {
        let arch = modality.architecture();
        let mut uniform = |rows: usize, cols: usize| {
            let limit = (6.0 / (rows + cols) as f64).sqrt();
            // Row-major draw order so the stream maps to weights predictably
            let values: Vec<f64> = (0..rows * cols)
                .map(|_| (rng.next_f64() * 2.0 - 1.0) * limit)
                .collect();
            DMatrix::from_row_slice(rows, cols, &values)
        };
        let w1 = uniform(arch.hidden, arch.input);
        let w2 = uniform(arch.output, arch.hidden);
        Self {
            modality,
            w1,
            b1: DVector::zeros(arch.hidden),
            w2,
            b2: DVector::zeros(arch.output),
        }
    }

    pub fn architecture(&self) -> Architecture {
        Architecture {
            input: self.w1.ncols(),
            hidden: self.w1.nrows(),
            output: self.w2.nrows(),
        }
    }

    /// True when every parameter block matches `arch`
    pub fn matches(&self, arch: &Architecture) -> bool {
        self.w1.shape() == (arch.hidden, arch.input)
            && self.b1.len() == arch.hidden
            && self.w2.shape() == (arch.output, arch.hidden)
            && self.b2.len() == arch.output
    }

    pub fn is_finite(&self) -> bool {
        self.w1.iter().chain(self.b1.iter()).chain(self.w2.iter()).chain(self.b2.iter())
            .all(|v| v.is_finite())
    }

    pub fn forward(&self, x: &DVector<f64>) -> Forward {
        let z1 = &self.w1 * x + &self.b1;
        let hidden = z1.map(|v| v.max(0.0));
        let logits = &self.w2 * &hidden + &self.b2;
        let probabilities = softmax(&logits);
        Forward { z1, hidden, logits, probabilities }
    }

    pub fn predict_proba(&self, x: &DVector<f64>) -> DVector<f64> {
        self.forward(x).probabilities
    }

    /// Cross-entropy loss and parameter gradients for one example
    pub fn backward(&self, x: &DVector<f64>, target: usize) -> (f64, Gradients) {
        let fwd = self.forward(x);
        let loss = -fwd.probabilities[target].max(1e-12).ln();

        let mut dz2 = fwd.probabilities.clone();
        dz2[target] -= 1.0;
        let dw2 = &dz2 * fwd.hidden.transpose();
        let dh = self.w2.transpose() * &dz2;
        let dz1 = dh.zip_map(&fwd.z1, |g, z| if z > 0.0 { g } else { 0.0 });
        let dw1 = &dz1 * x.transpose();

        (loss, Gradients { w1: dw1, b1: dz1, w2: dw2, b2: dz2 })
    }
}

/// Gradient (or optimizer moment) in the same layout as the model
#[derive(Debug, Clone)]
pub struct Gradients {
    pub w1: DMatrix<f64>,
    pub b1: DVector<f64>,
    pub w2: DMatrix<f64>,
    pub b2: DVector<f64>,
}

impl Gradients {
    pub fn zeros(arch: &Architecture) -> Self {
        Self {
            w1: DMatrix::zeros(arch.hidden, arch.input),
            b1: DVector::zeros(arch.hidden),
            w2: DMatrix::zeros(arch.output, arch.hidden),
            b2: DVector::zeros(arch.output),
        }
    }

    pub fn accumulate(&mut self, other: &Gradients) {
        self.w1 += &other.w1;
        self.b1 += &other.b1;
        self.w2 += &other.w2;
        self.b2 += &other.b2;
    }

    pub fn scale(&mut self, factor: f64) {
        self.w1 *= factor;
        self.b1 *= factor;
        self.w2 *= factor;
        self.b2 *= factor;
    }
}

/// Adam optimizer state
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    pub fn new(arch: &Architecture, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            m: Gradients::zeros(arch),
            v: Gradients::zeros(arch),
        }
    }

    pub fn step(&mut self, model: &mut TrainedModel, grads: &Gradients) {
        self.step += 1;
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let c1 = 1.0 - b1.powi(self.step);
        let c2 = 1.0 - b2.powi(self.step);

        fn update<'a>(
            params: impl Iterator<Item = &'a mut f64>,
            grads: impl Iterator<Item = &'a f64>,
            m: impl Iterator<Item = &'a mut f64>,
            v: impl Iterator<Item = &'a mut f64>,
            coeffs: (f64, f64, f64, f64, f64, f64),
        ) {
            let (b1, b2, eps, lr, c1, c2) = coeffs;
            for (((p, g), m), v) in params.zip(grads).zip(m).zip(v) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / c1;
                let v_hat = *v / c2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }

        let coeffs = (b1, b2, eps, lr, c1, c2);
        update(model.w1.iter_mut(), grads.w1.iter(), self.m.w1.iter_mut(), self.v.w1.iter_mut(), coeffs);
        update(model.b1.iter_mut(), grads.b1.iter(), self.m.b1.iter_mut(), self.v.b1.iter_mut(), coeffs);
        update(model.w2.iter_mut(), grads.w2.iter(), self.m.w2.iter_mut(), self.v.w2.iter_mut(), coeffs);
        update(model.b2.iter_mut(), grads.b2.iter(), self.m.b2.iter_mut(), self.v.b2.iter_mut(), coeffs);
    }
}
