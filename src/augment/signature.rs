//! Signature variant pipeline: pad, elastic warp, rotate, crop, Otsu, morph

use crate::features::{ExtractionError, INK_THRESHOLD};
use crate::raster::{
    binarize, center_crop, dilate3, erode3, foreground_ratio, gaussian_blur, histogram,
    otsu_threshold, pad, rotate, sample_bilinear,
};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureAugment {
    /// Border added before warping so strokes can move outward
    pub pad: usize,
    /// Gaussian sigma smoothing the displacement fields
    pub elastic_sigma: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub max_rotation_deg: f64,
    pub erode_probability: f64,
    /// Variants below this ink fraction are regenerated
    pub min_foreground: f64,
}

impl Default for SignatureAugment {
    fn default() -> Self {
        Self {
            pad: 8,
            elastic_sigma: 4.0,
            alpha_min: 20.0,
            alpha_max: 34.0,
            max_rotation_deg: 10.0,
            erode_probability: 0.3,
            min_foreground: 0.01,
        }
    }
}

impl SignatureAugment {
    /// Bounds must be finite and ordered; `gen_range` panics otherwise
    pub fn validate(&self) -> Result<(), String> {
        let bounds = [
            ("elastic_sigma", self.elastic_sigma),
            ("alpha_min", self.alpha_min),
            ("alpha_max", self.alpha_max),
            ("max_rotation_deg", self.max_rotation_deg),
        ];
        if let Some((name, v)) = bounds.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(format!("signature.{} must be finite and non-negative, got {}", name, v));
        }
        if self.alpha_min > self.alpha_max {
            return Err(format!(
                "signature.alpha_min {} exceeds alpha_max {}",
                self.alpha_min, self.alpha_max
            ));
        }
        Ok(())
    }
}

/// Displace every pixel by two blurred uniform noise fields scaled by `alpha`
pub fn elastic<R: Rng>(img: &DMatrix<f64>, sigma: f64, alpha: f64, rng: &mut R) -> DMatrix<f64> {
    let (h, w) = img.shape();
    let mut field = || {
        let noise = DMatrix::from_fn(h, w, |_, _| rng.gen_range(-1.0..=1.0));
        gaussian_blur(&noise, sigma) * alpha
    };
    let dx = field();
    let dy = field();
    DMatrix::from_fn(h, w, |y, x| {
        sample_bilinear(img, x as f64 + dx[(y, x)], y as f64 + dy[(y, x)], 0.0)
    })
}

/// Erode with probability `p`, otherwise dilate. Erosion that wipes out all
/// ink falls back to dilation.
pub fn erode_or_dilate<R: Rng>(img: &DMatrix<f64>, p: f64, rng: &mut R) -> DMatrix<f64> {
    if rng.gen_bool(p.clamp(0.0, 1.0)) {
        let eroded = erode3(img);
        if eroded.iter().any(|&v| v > INK_THRESHOLD) {
            return eroded;
        }
    }
    dilate3(img)
}

/// One synthetic variant of a stroke raster, same size as the input
pub fn variant<R: Rng>(
    img: &DMatrix<f64>,
    params: &SignatureAugment,
    rng: &mut R,
) -> Result<DMatrix<f64>, ExtractionError> {
    let (h, w) = img.shape();
    let padded = pad(img, params.pad, 0.0);

    let alpha = rng.gen_range(params.alpha_min..=params.alpha_max);
    let warped = elastic(&padded, params.elastic_sigma, alpha, rng);

    let angle = rng.gen_range(-params.max_rotation_deg..=params.max_rotation_deg);
    let rotated = rotate(&warped, angle, 0.0);

    let cropped = center_crop(&rotated, h, w);
    let threshold = otsu_threshold(&histogram(&cropped));
    let binary = binarize(&cropped, threshold);
    let out = erode_or_dilate(&binary, params.erode_probability, rng);

    if foreground_ratio(&out, INK_THRESHOLD) < params.min_foreground {
        return Err(ExtractionError::EmptyForegroundAfterAugmentation);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn strokes() -> DMatrix<f64> {
        let mut img = DMatrix::zeros(48, 96);
        for x in 10..80 {
            for t in 0..4 {
                img[(20 + t, x)] = 255.0;
            }
        }
        for y in 8..40 {
            for t in 0..4 {
                img[(y, 50 + t)] = 255.0;
            }
        }
        img
    }

    #[test]
    fn test_variant_is_binary_and_same_size() {
        let mut rng = StdRng::seed_from_u64(9);
        let out = variant(&strokes(), &SignatureAugment::default(), &mut rng).unwrap();
        assert_eq!(out.shape(), (48, 96));
        assert!(out.iter().all(|&v| v == 0.0 || v == 255.0));
        assert!(foreground_ratio(&out, INK_THRESHOLD) >= 0.01);
    }

    #[test]
    fn test_variant_deterministic_for_seed() {
        let params = SignatureAugment::default();
        let a = variant(&strokes(), &params, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = variant(&strokes(), &params, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_blank_input_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let blank = DMatrix::zeros(20, 20);
        assert_eq!(
            variant(&blank, &SignatureAugment::default(), &mut rng),
            Err(ExtractionError::EmptyForegroundAfterAugmentation)
        );
    }

    #[test]
    fn test_erosion_falls_back_to_dilation() {
        let mut thin = DMatrix::zeros(9, 9);
        for x in 1..8 {
            thin[(4, x)] = 255.0;
        }
        // p = 1 always tries erosion, which empties a one-pixel line
        let out = erode_or_dilate(&thin, 1.0, &mut StdRng::seed_from_u64(0));
        assert_eq!(out, dilate3(&thin));
    }

    #[test]
    fn test_zero_alpha_is_identity() {
        let img = strokes();
        let out = elastic(&img, 4.0, 0.0, &mut StdRng::seed_from_u64(2));
        assert_eq!(out, img);
    }
}
