//! Pose-normalised average hash
//!
//! The capture is warped so both eye centers land on fixed canvas positions,
//! downsampled to a small square and binarised against its own mean.

use crate::raster::{bounding_box, crop, resize_area, warp};
use crate::sample::Point2;
use nalgebra::DMatrix;

pub const CANVAS_SIZE: usize = 64;
pub const HASH_SIDE: usize = 16;
pub const LEFT_EYE_TARGET: Point2 = Point2 { x: 20.0, y: 24.0 };
pub const RIGHT_EYE_TARGET: Point2 = Point2 { x: 44.0, y: 24.0 };

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

/// Eye centers from a 68-point landmark list
pub fn eye_centers(landmarks: &[Point2]) -> Option<(Point2, Point2)> {
    if landmarks.len() < RIGHT_EYE.end {
        return None;
    }
    let left = Point2::centroid(&landmarks[LEFT_EYE])?;
    let right = Point2::centroid(&landmarks[RIGHT_EYE])?;
    Some((left, right))
}

/// Warp `img` so `left`/`right` map onto the canonical eye targets
pub fn align_eyes(img: &DMatrix<f64>, left: Point2, right: Point2) -> Option<DMatrix<f64>> {
    let dx = right.x - left.x;
    let dy = right.y - left.y;
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if !eye_dist.is_finite() || eye_dist < 1e-6 {
        return None;
    }
    let target_dist = RIGHT_EYE_TARGET.x - LEFT_EYE_TARGET.x;
    let inv_scale = eye_dist / target_dist;
    let (sin, cos) = dy.atan2(dx).sin_cos();
    Some(warp(img, CANVAS_SIZE, CANVAS_SIZE, 0.0, |x, y| {
        let u = (x - LEFT_EYE_TARGET.x) * inv_scale;
        let v = (y - LEFT_EYE_TARGET.y) * inv_scale;
        (left.x + cos * u - sin * v, left.y + sin * u + cos * v)
    }))
}

/// Mean-threshold bits of a `HASH_SIDE x HASH_SIDE` downsample, row-major
pub fn average_hash(img: &DMatrix<f64>) -> Vec<bool> {
    let small = resize_area(img, HASH_SIDE, HASH_SIDE);
    let mean = small.mean();
    // Row-major order: iterate rows explicitly, DMatrix storage is column-major
    (0..HASH_SIDE)
        .flat_map(|y| (0..HASH_SIDE).map(move |x| (y, x)))
        .map(|(y, x)| small[(y, x)] > mean)
        .collect()
}

/// Hash of a face aligned on its eye landmarks; `None` when landmarks are unusable
pub fn canonical_ahash(img: &DMatrix<f64>, landmarks: &[Point2]) -> Option<Vec<bool>> {
    let (left, right) = eye_centers(landmarks)?;
    align_eyes(img, left, right).map(|aligned| average_hash(&aligned))
}

/// Hash of a stroke raster normalised by cropping to its ink
pub fn stroke_ahash(img: &DMatrix<f64>) -> Option<Vec<bool>> {
    let region = bounding_box(img, |v| v > 0.0)?;
    Some(average_hash(&crop(img, &region)))
}

pub fn hamming(a: &[bool], b: &[bool]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).filter(|(x, y)| x != y).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_landmarks(left: Point2, right: Point2) -> Vec<Point2> {
        let mut pts = vec![Point2::new(0.0, 0.0); 68];
        for i in 36..42 {
            pts[i] = left;
        }
        for i in 42..48 {
            pts[i] = right;
        }
        pts
    }

    fn pattern() -> DMatrix<f64> {
        DMatrix::from_fn(80, 80, |y, x| if (x / 10 + y / 10) % 2 == 0 { 200.0 } else { 30.0 })
    }

    #[test]
    fn test_eye_targets_land() {
        let mut img = DMatrix::zeros(80, 80);
        img[(30, 25)] = 255.0;
        let aligned = align_eyes(&img, Point2::new(25.0, 30.0), Point2::new(55.0, 30.0)).unwrap();
        let at = aligned[(LEFT_EYE_TARGET.y as usize, LEFT_EYE_TARGET.x as usize)];
        assert!((at - 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_hash_length_and_identity() {
        let lm = face_landmarks(Point2::new(25.0, 30.0), Point2::new(55.0, 30.0));
        let a = canonical_ahash(&pattern(), &lm).unwrap();
        let b = canonical_ahash(&pattern(), &lm).unwrap();
        assert_eq!(a.len(), HASH_SIDE * HASH_SIDE);
        assert_eq!(hamming(&a, &b), Some(0));
    }

    #[test]
    fn test_degenerate_eyes() {
        let p = Point2::new(10.0, 10.0);
        assert!(canonical_ahash(&pattern(), &face_landmarks(p, p)).is_none());
        assert!(canonical_ahash(&pattern(), &[p; 20]).is_none());
    }

    #[test]
    fn test_hamming_length_mismatch() {
        assert_eq!(hamming(&[true, false], &[true]), None);
        assert_eq!(hamming(&[true, false], &[false, false]), Some(1));
    }

    #[test]
    fn test_stroke_hash_blank() {
        assert!(stroke_ahash(&DMatrix::zeros(5, 5)).is_none());
    }
}
