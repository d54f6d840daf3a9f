//! Signature features: Haar-like rectangle differences on a summed-area table

use super::{check_modality, finish, Extraction, ExtractionError, FeatureExtractor};
use crate::raster::{bounding_box, crop, pad, resize_area};
use crate::sample::{Modality, Sample};
use nalgebra::DMatrix;
use std::collections::VecDeque;

/// Border added before cropping so strokes touching the edge survive
pub const PAD_BORDER: usize = 4;
/// Side of the square the cropped strokes are resized to
pub const CANONICAL_SIZE: usize = 12;
/// Haar window side and stride: 3x3 positions, two features each
pub const HAAR_WINDOW: usize = 6;
pub const HAAR_STRIDE: usize = 3;
/// Ink threshold for aspect ratio and region counting
pub const INK_THRESHOLD: f64 = 127.0;

/// Summed-area table with a zero first row and column
#[derive(Debug, Clone)]
pub struct IntegralImage {
    table: DMatrix<f64>,
}

impl IntegralImage {
    pub fn new(img: &DMatrix<f64>) -> Self {
        let (h, w) = img.shape();
        let mut table = DMatrix::zeros(h + 1, w + 1);
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += img[(y, x)];
                table[(y + 1, x + 1)] = table[(y, x + 1)] + row;
            }
        }
        Self { table }
    }

    /// Sum over the `height x width` rectangle with top-left `(y, x)`
    pub fn rect_sum(&self, y: usize, x: usize, height: usize, width: usize) -> f64 {
        let t = &self.table;
        t[(y + height, x + width)] - t[(y, x + width)] - t[(y + height, x)] + t[(y, x)]
    }
}

/// Two-rectangle Haar features at every window position, row-major,
/// `[left - right, top - bottom]` per position, normalised to `[-1, 1]`.
pub fn haar_features(img: &DMatrix<f64>) -> Vec<f64> {
    let integral = IntegralImage::new(img);
    let (h, w) = img.shape();
    let half = HAAR_WINDOW / 2;
    let norm = (HAAR_WINDOW * half) as f64 * 255.0;
    let mut features = Vec::with_capacity(18);
    let mut y = 0;
    while y + HAAR_WINDOW <= h {
        let mut x = 0;
        while x + HAAR_WINDOW <= w {
            let left = integral.rect_sum(y, x, HAAR_WINDOW, half);
            let right = integral.rect_sum(y, x + half, HAAR_WINDOW, half);
            let top = integral.rect_sum(y, x, half, HAAR_WINDOW);
            let bottom = integral.rect_sum(y + half, x, half, HAAR_WINDOW);
            features.push((left - right) / norm);
            features.push((top - bottom) / norm);
            x += HAAR_STRIDE;
        }
        y += HAAR_STRIDE;
    }
    features
}

/// Width over height of the inked bounding box; zero when there is no ink
pub fn aspect_ratio(img: &DMatrix<f64>) -> f64 {
    match bounding_box(img, |v| v > INK_THRESHOLD) {
        Some(region) => region.width() as f64 / region.height() as f64,
        None => 0.0,
    }
}

/// Number of 4-connected inked regions
pub fn connected_components(img: &DMatrix<f64>) -> usize {
    let (h, w) = img.shape();
    let mut visited = vec![false; h * w];
    let mut count = 0;
    let mut queue = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            if visited[y * w + x] || img[(y, x)] <= INK_THRESHOLD {
                continue;
            }
            count += 1;
            visited[y * w + x] = true;
            queue.push_back((y, x));
            while let Some((cy, cx)) = queue.pop_front() {
                let neighbours = [
                    (cy.wrapping_sub(1), cx),
                    (cy + 1, cx),
                    (cy, cx.wrapping_sub(1)),
                    (cy, cx + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny >= h || nx >= w {
                        continue;
                    }
                    let idx = ny * w + nx;
                    if !visited[idx] && img[(ny, nx)] > INK_THRESHOLD {
                        visited[idx] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }
        }
    }
    count
}

/// Stroke raster to 20 numbers
#[derive(Debug, Clone, Default)]
pub struct SignatureExtractor;

impl SignatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Pad, crop to the non-zero bounding box and resize to the canonical square
    pub fn normalise(img: &DMatrix<f64>) -> DMatrix<f64> {
        let padded = pad(img, PAD_BORDER, 0.0);
        let cropped = match bounding_box(&padded, |v| v > 0.0) {
            Some(region) => crop(&padded, &region),
            None => padded,
        };
        resize_area(&cropped, CANONICAL_SIZE, CANONICAL_SIZE)
    }

    pub fn features_of(img: &DMatrix<f64>) -> Vec<f64> {
        let mut values = haar_features(&Self::normalise(img));
        // Scalars come from the original raster, not the crop
        values.push(aspect_ratio(img));
        values.push(connected_components(img) as f64);
        values
    }
}

impl FeatureExtractor for SignatureExtractor {
    fn modality(&self) -> Modality {
        Modality::Signature
    }

    fn analyze(&self, sample: &Sample) -> Result<Extraction, ExtractionError> {
        check_modality(Modality::Signature, sample)?;
        let features = finish(Modality::Signature, Self::features_of(&sample.raster.luma()))?;
        Ok(Extraction {
            descriptor: Some(features.values().to_vec()),
            features,
            landmarks: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    fn two_strokes() -> DMatrix<f64> {
        let mut img = DMatrix::zeros(30, 60);
        for x in 5..25 {
            img[(10, x)] = 255.0;
            img[(11, x)] = 255.0;
        }
        for y in 5..20 {
            img[(y, 40)] = 255.0;
        }
        img
    }

    #[test]
    fn test_integral_rect_sum() {
        let img = DMatrix::from_fn(4, 5, |y, x| (y * 5 + x) as f64);
        let integral = IntegralImage::new(&img);
        let direct: f64 = img.view((1, 2), (2, 3)).iter().sum();
        assert!((integral.rect_sum(1, 2, 2, 3) - direct).abs() < 1e-9);
        assert!((integral.rect_sum(0, 0, 4, 5) - img.sum()).abs() < 1e-9);
    }

    #[test]
    fn test_haar_count() {
        let img = DMatrix::from_element(CANONICAL_SIZE, CANONICAL_SIZE, 100.0);
        let feats = haar_features(&img);
        assert_eq!(feats.len(), 18);
        assert!(feats.iter().all(|f| f.abs() < 1e-12));
    }

    #[test]
    fn test_components_and_ratio() {
        let img = two_strokes();
        assert_eq!(connected_components(&img), 2);
        // ink spans x 5..=40, y 5..=19
        assert!((aspect_ratio(&img) - 36.0 / 15.0).abs() < 1e-12);
        assert_eq!(connected_components(&DMatrix::zeros(5, 5)), 0);
    }

    #[test]
    fn test_extract_length_and_finite() {
        let extractor = SignatureExtractor::new();
        for img in [two_strokes(), DMatrix::zeros(8, 8), DMatrix::from_element(3, 50, 255.0)] {
            let sample = Sample::new(Modality::Signature, Raster::gray(img));
            let fv = extractor.extract(&sample).unwrap();
            assert_eq!(fv.len(), 20);
            assert!(fv.is_finite());
        }
    }

    #[test]
    fn test_extract_deterministic() {
        let extractor = SignatureExtractor::new();
        let sample = Sample::new(Modality::Signature, Raster::gray(two_strokes()));
        assert_eq!(extractor.extract(&sample).unwrap(), extractor.extract(&sample).unwrap());
    }

    #[test]
    fn test_rejects_face_sample() {
        let sample = Sample::new(Modality::Face, Raster::zeros(4, 4));
        assert!(matches!(
            SignatureExtractor::new().extract(&sample),
            Err(ExtractionError::ModalityMismatch { .. })
        ));
    }
}
