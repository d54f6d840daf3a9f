//! Geometric and morphological pixel operations

use crate::sample::Region;
use nalgebra::DMatrix;

/// Surround the image with a constant border
pub fn pad(img: &DMatrix<f64>, border: usize, fill: f64) -> DMatrix<f64> {
    let (h, w) = img.shape();
    let mut out = DMatrix::from_element(h + 2 * border, w + 2 * border, fill);
    out.view_mut((border, border), (h, w)).copy_from(img);
    out
}

/// Tight bounding box of pixels satisfying `pred`, or `None` if there are none
pub fn bounding_box<F>(img: &DMatrix<f64>, pred: F) -> Option<Region>
where
    F: Fn(f64) -> bool,
{
    let (h, w) = img.shape();
    let mut region: Option<Region> = None;
    for y in 0..h {
        for x in 0..w {
            if !pred(img[(y, x)]) {
                continue;
            }
            region = Some(match region {
                None => Region { x0: x, y0: y, x1: x, y1: y },
                Some(r) => Region {
                    x0: r.x0.min(x),
                    y0: r.y0.min(y),
                    x1: r.x1.max(x),
                    y1: r.y1.max(y),
                },
            });
        }
    }
    region
}

pub fn crop(img: &DMatrix<f64>, region: &Region) -> DMatrix<f64> {
    img.view((region.y0, region.x0), (region.height(), region.width()))
        .into_owned()
}

/// Crop a centered `height x width` window; the image must be at least that large
pub fn center_crop(img: &DMatrix<f64>, height: usize, width: usize) -> DMatrix<f64> {
    let (h, w) = img.shape();
    let height = height.min(h);
    let width = width.min(w);
    let y0 = (h - height) / 2;
    let x0 = (w - width) / 2;
    img.view((y0, x0), (height, width)).into_owned()
}

/// Area-average resampling: each output cell is the coverage-weighted mean of
/// the source pixels under its footprint.
pub fn resize_area(img: &DMatrix<f64>, out_h: usize, out_w: usize) -> DMatrix<f64> {
    let (h, w) = img.shape();
    if h == 0 || w == 0 || out_h == 0 || out_w == 0 {
        return DMatrix::zeros(out_h, out_w);
    }
    let sy = h as f64 / out_h as f64;
    let sx = w as f64 / out_w as f64;

    // Per-axis (source index, coverage) spans
    let spans = |n_out: usize, scale: f64, n_src: usize| -> Vec<Vec<(usize, f64)>> {
        (0..n_out)
            .map(|i| {
                let lo = i as f64 * scale;
                let hi = ((i + 1) as f64 * scale).min(n_src as f64);
                let first = lo.floor() as usize;
                let last = (hi.ceil() as usize).min(n_src);
                (first..last)
                    .map(|s| {
                        let cover = (hi.min((s + 1) as f64) - lo.max(s as f64)).max(0.0);
                        (s, cover)
                    })
                    .filter(|(_, c)| *c > 0.0)
                    .collect()
            })
            .collect()
    };
    let rows = spans(out_h, sy, h);
    let cols = spans(out_w, sx, w);

    DMatrix::from_fn(out_h, out_w, |i, j| {
        let mut acc = 0.0;
        let mut weight = 0.0;
        for &(y, wy) in &rows[i] {
            for &(x, wx) in &cols[j] {
                acc += img[(y, x)] * wy * wx;
                weight += wy * wx;
            }
        }
        if weight > 0.0 {
            acc / weight
        } else {
            0.0
        }
    })
}

/// Bilinear sample at fractional `(x, y)`; neighbours outside the image read `fill`
pub fn sample_bilinear(img: &DMatrix<f64>, x: f64, y: f64, fill: f64) -> f64 {
    let (h, w) = img.shape();
    if !x.is_finite() || !y.is_finite() || x < -1.0 || y < -1.0 || x > w as f64 || y > h as f64 {
        return fill;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let at = |yy: f64, xx: f64| -> f64 {
        if yy < 0.0 || xx < 0.0 || yy >= h as f64 || xx >= w as f64 {
            fill
        } else {
            img[(yy as usize, xx as usize)]
        }
    };
    let top = at(y0, x0) * (1.0 - fx) + at(y0, x0 + 1.0) * fx;
    let bottom = at(y0 + 1.0, x0) * (1.0 - fx) + at(y0 + 1.0, x0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Inverse-mapping warp: `source(x, y)` gives the source coordinate for each
/// output pixel.
pub fn warp<F>(img: &DMatrix<f64>, out_h: usize, out_w: usize, fill: f64, source: F) -> DMatrix<f64>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    DMatrix::from_fn(out_h, out_w, |y, x| {
        let (sx, sy) = source(x as f64, y as f64);
        sample_bilinear(img, sx, sy, fill)
    })
}

/// Rotate about the image center by `degrees` (counter-clockwise), same size
pub fn rotate(img: &DMatrix<f64>, degrees: f64, fill: f64) -> DMatrix<f64> {
    let (h, w) = img.shape();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();
    warp(img, h, w, fill, |x, y| {
        let dx = x - cx;
        let dy = y - cy;
        (cx + cos * dx - sin * dy, cy + sin * dx + cos * dy)
    })
}

/// Normalised 1D Gaussian kernel with radius `ceil(3 sigma)`
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as i64;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Separable Gaussian blur with clamped borders
pub fn gaussian_blur(img: &DMatrix<f64>, sigma: f64) -> DMatrix<f64> {
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (h, w) = img.shape();
    if h == 0 || w == 0 {
        return img.clone();
    }
    let clamp = |v: i64, n: usize| -> usize { v.clamp(0, n as i64 - 1) as usize };

    let horizontal: DMatrix<f64> = DMatrix::from_fn(h, w, |y, x| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wk)| wk * img[(y, clamp(x as i64 + k as i64 - radius, w))])
            .sum()
    });
    DMatrix::from_fn(h, w, |y, x| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wk)| wk * horizontal[(clamp(y as i64 + k as i64 - radius, h), x)])
            .sum()
    })
}

fn filter3<F>(img: &DMatrix<f64>, pick: F) -> DMatrix<f64>
where
    F: Fn(f64, f64) -> f64,
{
    let (h, w) = img.shape();
    DMatrix::from_fn(h, w, |y, x| {
        let mut acc = img[(y, x)];
        for yy in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for xx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                acc = pick(acc, img[(yy, xx)]);
            }
        }
        acc
    })
}

/// 3x3 minimum filter
pub fn erode3(img: &DMatrix<f64>) -> DMatrix<f64> {
    filter3(img, f64::min)
}

/// 3x3 maximum filter
pub fn dilate3(img: &DMatrix<f64>) -> DMatrix<f64> {
    filter3(img, f64::max)
}

/// Fraction of pixels strictly above `threshold`
pub fn foreground_ratio(img: &DMatrix<f64>, threshold: f64) -> f64 {
    if img.is_empty() {
        return 0.0;
    }
    img.iter().filter(|&&v| v > threshold).count() as f64 / img.len() as f64
}
