//! Integer forward pass matching the verifier's arithmetic

use super::quantize::{quantize_slice, QuantizeError, QuantizedModel, ScaleFactors};
use crate::sample::FeatureVector;
use crate::train::Classifier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointOutput {
    /// Post-ReLU hidden activations at scale `s1²`
    pub hidden: Vec<i128>,
    /// Output logits at scale `s1³`
    pub logits: Vec<i128>,
    /// Index of the first maximal logit
    pub predicted: usize,
}

/// Standardise with the classifier's scaler, then quantize at the input scale
pub fn quantize_input(
    classifier: &Classifier,
    features: &FeatureVector,
    scales: &ScaleFactors,
) -> Result<Vec<i64>, QuantizeError> {
    if features.len() != classifier.scaler.dim() {
        return Err(QuantizeError::InputDimension {
            expected: classifier.scaler.dim(),
            actual: features.len(),
        });
    }
    quantize_slice("input", classifier.scaler.transform(features.values()), scales.input())
}

/// Checked `i128` dot product; row `index` of `tensor` names the overflow
fn dot(
    tensor: &'static str,
    index: usize,
    weights: &[i64],
    values: impl Iterator<Item = i128>,
) -> Result<i128, QuantizeError> {
    weights.iter().zip(values).try_fold(0i128, |acc, (&w, x)| {
        (w as i128)
            .checked_mul(x)
            .and_then(|p| acc.checked_add(p))
            .ok_or(QuantizeError::Overflow { tensor, index })
    })
}

pub fn forward(model: &QuantizedModel, input: &[i64]) -> Result<FixedPointOutput, QuantizeError> {
    let arch = model.architecture;
    if input.len() != arch.input {
        return Err(QuantizeError::InputDimension {
            expected: arch.input,
            actual: input.len(),
        });
    }

    let hidden = (0..arch.hidden)
        .map(|r| {
            let acc = dot("hidden", r, model.w1_row(r), input.iter().map(|&x| x as i128))?;
            let acc = acc
                .checked_add(model.b1[r] as i128)
                .ok_or(QuantizeError::Overflow { tensor: "hidden", index: r })?;
            Ok(acc.max(0))
        })
        .collect::<Result<Vec<i128>, QuantizeError>>()?;

    let logits = (0..arch.output)
        .map(|r| {
            let acc = dot("logits", r, model.w2_row(r), hidden.iter().copied())?;
            acc.checked_add(model.b2[r] as i128)
                .ok_or(QuantizeError::Overflow { tensor: "logits", index: r })
        })
        .collect::<Result<Vec<i128>, QuantizeError>>()?;

    let predicted = logits
        .iter()
        .enumerate()
        .fold((0, i128::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0;

    Ok(FixedPointOutput { hidden, logits, predicted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Modality;
    use crate::train::{Lcg, TrainedModel};
    use nalgebra::DVector;

    #[test]
    fn test_matches_float_forward() {
        let model = TrainedModel::initialize(Modality::Signature, &mut Lcg::new(8));
        let scales = ScaleFactors::from_base(1024).unwrap();
        let q = QuantizedModel::from_model(&model, scales).unwrap();
        let x: Vec<f64> = (0..20).map(|i| ((i as f64) * 0.7).cos()).collect();
        let xq = quantize_slice("input", x.iter().copied(), scales.input()).unwrap();

        let out = forward(&q, &xq).unwrap();
        let float = model.forward(&DVector::from_vec(x));
        for (fixed, real) in out.logits.iter().zip(float.logits.iter()) {
            let approx = *fixed as f64 / scales.b2 as f64;
            assert!((approx - real).abs() < 0.05, "{} vs {}", approx, real);
        }
        if (float.logits[0] - float.logits[1]).abs() > 0.1 {
            assert_eq!(out.predicted, float.logits.argmax().0);
        }
    }

    #[test]
    fn test_relu_clamps() {
        let model = TrainedModel::initialize(Modality::Signature, &mut Lcg::new(2));
        let q = QuantizedModel::from_model(&model, ScaleFactors::from_base(16).unwrap()).unwrap();
        let out = forward(&q, &[-100; 20]).unwrap();
        assert!(out.hidden.iter().all(|&h| h >= 0));
    }

    #[test]
    fn test_accumulator_overflow_is_an_error() {
        let arch = Modality::Signature.architecture();
        let big = 1i64 << 62;
        let model = QuantizedModel {
            modality: Modality::Signature,
            scales: ScaleFactors::from_base(16).unwrap(),
            architecture: arch,
            w1: vec![big; arch.hidden * arch.input],
            b1: vec![0; arch.hidden],
            w2: vec![big; arch.output * arch.hidden],
            b2: vec![0; arch.output],
        };
        let input = vec![big; arch.input];
        assert!(matches!(
            forward(&model, &input),
            Err(QuantizeError::Overflow { tensor: "hidden", index: 0 })
        ));

        // Layer 1 fits; layer 2 products pass i128
        let model = QuantizedModel { w1: vec![1; arch.hidden * arch.input], ..model };
        assert!(matches!(
            forward(&model, &input),
            Err(QuantizeError::Overflow { tensor: "logits", index: 0 })
        ));
    }

    #[test]
    fn test_input_length_checked() {
        let model = TrainedModel::initialize(Modality::Face, &mut Lcg::new(2));
        let q = QuantizedModel::from_model(&model, ScaleFactors::from_base(16).unwrap()).unwrap();
        assert_eq!(
            forward(&q, &[0; 20]),
            Err(QuantizeError::InputDimension { expected: 32, actual: 20 })
        );
    }
}
