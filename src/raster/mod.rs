//! Raster: 2D numeric images and the pixel operations the pipelines share
//!
//! Pixels are `f64` intensities in `[0, 255]`, stored one `DMatrix` per channel
//! with `(row, col) = (y, x)`. Signature captures are single-channel with ink
//! as high values on a zero background.

mod ops;
mod threshold;

pub use ops::{
    bounding_box, center_crop, crop, dilate3, erode3, foreground_ratio, gaussian_blur,
    gaussian_kernel, pad, resize_area, rotate, sample_bilinear, warp,
};
pub use threshold::{between_class_variance, binarize, histogram, otsu_threshold};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RasterError {
    #[error("raster needs 1 or 3 planes, got {0}")]
    PlaneCount(usize),

    #[error("plane {index} is {actual:?}, plane 0 is {expected:?}")]
    PlaneShape {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// A grayscale or RGB raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RasterPlanes")]
pub struct Raster {
    planes: Vec<DMatrix<f64>>,
}

/// Unchecked wire form of `Raster`
#[derive(Deserialize)]
struct RasterPlanes {
    planes: Vec<DMatrix<f64>>,
}

impl TryFrom<RasterPlanes> for Raster {
    type Error = RasterError;

    fn try_from(raw: RasterPlanes) -> Result<Self, Self::Error> {
        let planes = raw.planes;
        if planes.len() != 1 && planes.len() != 3 {
            return Err(RasterError::PlaneCount(planes.len()));
        }
        let expected = planes[0].shape();
        if let Some((index, p)) = planes.iter().enumerate().find(|(_, p)| p.shape() != expected) {
            return Err(RasterError::PlaneShape {
                index,
                expected,
                actual: p.shape(),
            });
        }
        Ok(Self { planes })
    }
}

impl Raster {
    /// Single-channel raster
    pub fn gray(pixels: DMatrix<f64>) -> Self {
        Self { planes: vec![pixels] }
    }

    /// Three-channel raster; all planes must share one shape
    pub fn rgb(r: DMatrix<f64>, g: DMatrix<f64>, b: DMatrix<f64>) -> Option<Self> {
        if r.shape() != g.shape() || r.shape() != b.shape() {
            return None;
        }
        Some(Self { planes: vec![r, g, b] })
    }

    pub fn zeros(height: usize, width: usize) -> Self {
        Self::gray(DMatrix::zeros(height, width))
    }

    pub fn width(&self) -> usize {
        self.planes[0].ncols()
    }

    pub fn height(&self) -> usize {
        self.planes[0].nrows()
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn planes(&self) -> &[DMatrix<f64>] {
        &self.planes
    }

    /// Luma (Rec. 601) for RGB, the single plane otherwise
    pub fn luma(&self) -> DMatrix<f64> {
        match self.planes.as_slice() {
            [r, g, b] => r * 0.299 + g * 0.587 + b * 0.114,
            [gray, ..] => gray.clone(),
            [] => DMatrix::zeros(0, 0),
        }
    }

    /// Apply the same plane transform to every channel
    pub fn map_planes<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&DMatrix<f64>) -> DMatrix<f64>,
    {
        Self {
            planes: self.planes.iter().map(|p| f(p)).collect(),
        }
    }

    pub fn clamp(&self) -> Self {
        self.map_planes(|p| p.map(|v| v.clamp(0.0, 255.0)))
    }
}
