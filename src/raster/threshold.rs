//! Otsu thresholding over the 256-level intensity histogram

use nalgebra::DMatrix;

/// 256-bin histogram of intensities rounded and clamped to `[0, 255]`
pub fn histogram(img: &DMatrix<f64>) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in img.iter() {
        let bin = v.round().clamp(0.0, 255.0) as usize;
        hist[bin] += 1;
    }
    hist
}

/// Between-class variance `w0 * w1 * (mu0 - mu1)^2` when levels `0..=t` form
/// the background class.
pub fn between_class_variance(hist: &[u64; 256], t: usize) -> f64 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let (mut n0, mut s0) = (0u64, 0.0f64);
    let (mut n1, mut s1) = (0u64, 0.0f64);
    for (level, &count) in hist.iter().enumerate() {
        if level <= t {
            n0 += count;
            s0 += level as f64 * count as f64;
        } else {
            n1 += count;
            s1 += level as f64 * count as f64;
        }
    }
    if n0 == 0 || n1 == 0 {
        return 0.0;
    }
    let w0 = n0 as f64 / total as f64;
    let w1 = n1 as f64 / total as f64;
    let mu0 = s0 / n0 as f64;
    let mu1 = s1 / n1 as f64;
    w0 * w1 * (mu0 - mu1).powi(2)
}

/// Threshold maximising between-class variance; ties resolve to the lowest level.
///
/// Runs in one pass with cumulative sums, equivalent to evaluating
/// [`between_class_variance`] at every level.
pub fn otsu_threshold(hist: &[u64; 256]) -> u8 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let total_f = total as f64;
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(level, &c)| level as f64 * c as f64)
        .sum();

    let mut best_t = 0usize;
    let mut best_var = -1.0f64;
    let mut n0 = 0f64;
    let mut s0 = 0f64;
    for (t, &count) in hist.iter().enumerate() {
        n0 += count as f64;
        s0 += t as f64 * count as f64;
        let n1 = total_f - n0;
        if n0 == 0.0 || n1 == 0.0 {
            continue;
        }
        let mu0 = s0 / n0;
        let mu1 = (sum_all - s0) / n1;
        let var = (n0 / total_f) * (n1 / total_f) * (mu0 - mu1).powi(2);
        if var > best_var + 1e-12 {
            best_var = var;
            best_t = t;
        }
    }
    best_t as u8
}

/// Pixels above `threshold` become 255, everything else 0
pub fn binarize(img: &DMatrix<f64>, threshold: u8) -> DMatrix<f64> {
    let t = threshold as f64;
    img.map(|v| if v.round() > t { 255.0 } else { 0.0 })
}
