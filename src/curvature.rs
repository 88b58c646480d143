//! Curvature classification: a 3x3 Laplacian convolution used to tell peaks
//! from ridges and saddles when extracting summits.

use ndarray::Array2;

use crate::consts::IQR_TO_SIGMA;

/// Per-pixel curvature sign: -1 (curved down / peak-like for negative
/// sources), 0 (flat), +1 (curved up / peak-like for positive sources).
pub struct CurvatureMap {
    pub values: Array2<f64>,
    pub sign: Array2<i8>,
    pub sigma: f64,
}

impl CurvatureMap {
    /// Computes the Laplacian of `data` with edge-clamped boundary handling,
    /// then classifies each pixel against `+-sigma` where `sigma` is the
    /// IQR-based robust standard deviation of the Laplacian values (unless
    /// `sigma_override` is given).
    pub fn compute(data: &Array2<f32>, sigma_override: Option<f64>) -> Self {
        let values = laplacian(data);
        let sigma = sigma_override.unwrap_or_else(|| iqr_sigma(&values));
        let sign = values.mapv(|v| {
            if !v.is_finite() {
                0
            } else if v <= -sigma {
                -1
            } else if v >= sigma {
                1
            } else {
                0
            }
        });
        Self {
            values,
            sign,
            sigma,
        }
    }
}

/// 3x3 Laplacian kernel `[[1,1,1],[1,-8,1],[1,1,1]]`, edges clamped to the
/// nearest interior pixel.
fn laplacian(data: &Array2<f32>) -> Array2<f64> {
    let (h, w) = data.dim();
    let clamp_row = |r: isize| r.clamp(0, h as isize - 1) as usize;
    let clamp_col = |c: isize| c.clamp(0, w as isize - 1) as usize;

    Array2::from_shape_fn((h, w), |(row, col)| {
        let mut acc = 0.0f64;
        let mut any_nan = false;
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                let weight: f64 = if dr == 0 && dc == 0 { -8.0 } else { 1.0 };
                let r = clamp_row(row as isize + dr);
                let c = clamp_col(col as isize + dc);
                let v = data[[r, c]];
                if !v.is_finite() {
                    any_nan = true;
                } else {
                    acc += weight * v as f64;
                }
            }
        }
        if any_nan {
            f64::NAN
        } else {
            acc
        }
    })
}

/// Interquartile-range-based robust standard deviation of the finite values
/// in `values`.
fn iqr_sigma(values: &Array2<f64>) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 4 {
        return 0.0;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q1 = percentile(&finite, 0.25);
    let q3 = percentile(&finite, 0.75);
    (q3 - q1) / IQR_TO_SIGMA
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = p * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn flat_image_has_zero_curvature() {
        let data = Array2::<f32>::from_elem((10, 10), 5.0);
        let cm = CurvatureMap::compute(&data, None);
        assert!(cm.values.iter().all(|&v| v.abs() < 1e-9));
        assert!(cm.sign.iter().all(|&s| s == 0));
    }

    #[test]
    fn peak_is_curved_down() {
        let mut data = Array2::<f32>::zeros((9, 9));
        data[[4, 4]] = 10.0;
        let cm = CurvatureMap::compute(&data, Some(0.5));
        assert_eq!(cm.sign[[4, 4]], -1);
    }
}
