//! Face variant pipeline: affine jitter, photometric jitter, noise, flip

use crate::features::ExtractionError;
use crate::raster::{foreground_ratio, warp, Raster};
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceAugment {
    pub max_rotation_deg: f64,
    /// Relative scale jitter (0.1 = ±10%)
    pub max_scale: f64,
    pub max_translate_px: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub noise_probability: f64,
    pub noise_sigma: f64,
    pub flip_probability: f64,
    /// A pixel counts as lit above this intensity
    pub intensity_threshold: f64,
    /// Variants with fewer lit pixels than this fraction are regenerated
    pub min_bright_fraction: f64,
}

impl Default for FaceAugment {
    fn default() -> Self {
        Self {
            max_rotation_deg: 8.0,
            max_scale: 0.10,
            max_translate_px: 4.0,
            brightness: 0.15,
            contrast: 0.15,
            noise_probability: 0.3,
            noise_sigma: 8.0,
            flip_probability: 0.5,
            intensity_threshold: 20.0,
            min_bright_fraction: 0.25,
        }
    }
}

impl FaceAugment {
    /// Every jitter bound must be finite and non-negative; scale below 100%
    pub fn validate(&self) -> Result<(), String> {
        let bounds = [
            ("max_rotation_deg", self.max_rotation_deg),
            ("max_scale", self.max_scale),
            ("max_translate_px", self.max_translate_px),
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("noise_sigma", self.noise_sigma),
        ];
        if let Some((name, v)) = bounds.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(format!("face.{} must be finite and non-negative, got {}", name, v));
        }
        if self.max_scale >= 1.0 {
            return Err(format!("face.max_scale must be below 1, got {}", self.max_scale));
        }
        Ok(())
    }
}

/// Parameters drawn once per variant and applied to every channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceJitter {
    pub rotation_deg: f64,
    pub scale: f64,
    pub translate: (f64, f64),
    pub brightness: f64,
    pub contrast: f64,
    pub noise: bool,
    pub flip: bool,
}

impl FaceJitter {
    pub fn identity() -> Self {
        Self {
            rotation_deg: 0.0,
            scale: 1.0,
            translate: (0.0, 0.0),
            brightness: 0.0,
            contrast: 0.0,
            noise: false,
            flip: false,
        }
    }

    pub fn draw<R: Rng>(params: &FaceAugment, rng: &mut R) -> Self {
        let sym = |rng: &mut R, bound: f64| rng.gen_range(-bound..=bound);
        Self {
            rotation_deg: sym(rng, params.max_rotation_deg),
            scale: 1.0 + sym(rng, params.max_scale),
            translate: (sym(rng, params.max_translate_px), sym(rng, params.max_translate_px)),
            brightness: sym(rng, params.brightness),
            contrast: sym(rng, params.contrast),
            noise: rng.gen_bool(params.noise_probability.clamp(0.0, 1.0)),
            flip: rng.gen_bool(params.flip_probability.clamp(0.0, 1.0)),
        }
    }
}

/// Rotate, scale and translate about the image center
fn affine(img: &DMatrix<f64>, jitter: &FaceJitter) -> DMatrix<f64> {
    let (h, w) = img.shape();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;
    let (sin, cos) = jitter.rotation_deg.to_radians().sin_cos();
    let (tx, ty) = jitter.translate;
    let scale = jitter.scale.max(1e-6);
    warp(img, h, w, 0.0, |x, y| {
        let dx = x - cx - tx;
        let dy = y - cy - ty;
        (cx + (cos * dx + sin * dy) / scale, cy + (-sin * dx + cos * dy) / scale)
    })
}

/// Brightness first, then contrast about the brightened mean
fn photometric(img: &DMatrix<f64>, jitter: &FaceJitter) -> DMatrix<f64> {
    let bright = img * (1.0 + jitter.brightness);
    let mean = bright.mean();
    bright.map(|v| (v - mean) * (1.0 + jitter.contrast) + mean)
}

fn flip_horizontal(img: &DMatrix<f64>) -> DMatrix<f64> {
    let (h, w) = img.shape();
    DMatrix::from_fn(h, w, |y, x| img[(y, w - 1 - x)])
}

/// Apply a drawn jitter to every channel
pub fn apply<R: Rng>(raster: &Raster, jitter: &FaceJitter, sigma: f64, rng: &mut R) -> Raster {
    let out = raster.map_planes(|plane| {
        let mut p = photometric(&affine(plane, jitter), jitter);
        if jitter.noise {
            p.iter_mut().for_each(|v| *v += rng.sample::<f64, _>(StandardNormal) * sigma);
        }
        if jitter.flip {
            p = flip_horizontal(&p);
        }
        p
    });
    out.clamp()
}

/// One synthetic variant; too-dark results are rejected for regeneration
pub fn variant<R: Rng>(
    raster: &Raster,
    params: &FaceAugment,
    rng: &mut R,
) -> Result<Raster, ExtractionError> {
    let jitter = FaceJitter::draw(params, rng);
    let out = apply(raster, &jitter, params.noise_sigma, rng);
    if foreground_ratio(&out.luma(), params.intensity_threshold) < params.min_bright_fraction {
        return Err(ExtractionError::EmptyForegroundAfterAugmentation);
    }
    Ok(out)
}
