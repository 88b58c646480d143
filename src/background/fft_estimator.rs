//! Two-pass FFT background/RMS estimator (the `BackgroundMethod::Fft` path).

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fft::convolve2d_circular;
use crate::geometry::PixelBeam;
use crate::image::PixelImage;
use crate::kernel::KernelBuilder;

use super::BackgroundMaps;

/// Runs the two-pass FFT background/RMS estimator described in
/// `BackgroundEstimator` (see `DESIGN.md`): a first pass on the raw
/// downsampled image, then a second pass with source-contaminated pixels
/// replaced by synthetic Gaussian noise, upsampled back to full resolution.
pub fn estimate(
    image: &PixelImage,
    pixel_beam: Option<PixelBeam>,
    config: &EngineConfig,
) -> Result<BackgroundMaps> {
    let kernel = KernelBuilder::build(pixel_beam, config)?;
    let (h, w) = image.shape();
    info!(height = h, width = w, step_size = kernel.step_size, "running FFT background estimator");

    let nan_mask = finite_count_mask(image, &kernel.kernel, kernel.kernel_sum);
    let image_full: Array2<f64> = image.as_array().mapv(|v| {
        if v.is_finite() {
            v as f64
        } else {
            0.0
        }
    });

    let row_idx = downsample_indices(h, kernel.step_size.max(1) as usize);
    let col_idx = downsample_indices(w, kernel.step_size.max(1) as usize);
    let image_ds = downsample(&image_full, &row_idx, &col_idx);
    debug!(ds_h = image_ds.dim().0, ds_w = image_ds.dim().1, "downsampled image");

    let (mean1, rms1) = bane_fft(&image_ds, &kernel.kernel, kernel.kernel_sum);

    let median_rms1 = median(rms1.iter().copied());
    let mean_rms1 = rms1.iter().sum::<f64>() / rms1.len().max(1) as f64;

    let mut rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
    let mut image_masked = image_full.clone();
    for v in image_masked.iter_mut() {
        let snr = v.abs() / median_rms1.max(f64::MIN_POSITIVE);
        if snr >= crate::consts::BACKGROUND_SOURCE_MASK_SNR {
            *v = sample_normal(&mut rng) * mean_rms1;
        }
    }

    let image_masked_ds = downsample(&image_masked, &row_idx, &col_idx);
    let (mean2, rms2) = bane_fft(&image_masked_ds, &kernel.kernel, kernel.kernel_sum);

    let mut background = upsample_bilinear(&mean2, h, w).mapv(|v| v as f32);
    let mut rms = upsample_bilinear(&rms2, h, w).mapv(|v| v as f32);

    for ((bg, rm), masked) in background
        .iter_mut()
        .zip(rms.iter_mut())
        .zip(nan_mask.iter())
    {
        if *masked {
            *bg = f32::NAN;
            *rm = f32::NAN;
        }
    }

    let _ = mean1; // only rms1's median/mean feed the source mask; mean1 is diagnostic.
    Ok(BackgroundMaps { background, rms })
}

/// `mean = conv(image, kernel) / kernel_sum`;
/// `rms = conv(|image - mean|, kernel) / kernel_sum`.
fn bane_fft(image: &Array2<f64>, kernel: &Array2<f64>, kernel_sum: f64) -> (Array2<f64>, Array2<f64>) {
    let mean = convolve2d_circular(image, kernel).mapv(|v| v / kernel_sum);
    let abs_diff = Array2::from_shape_fn(image.dim(), |idx| (image[idx] - mean[idx]).abs());
    let rms = convolve2d_circular(&abs_diff, kernel).mapv(|v| v / kernel_sum);
    (mean, rms)
}

/// True where the kernel-weighted count of finite neighbors is below 1,
/// i.e. the pixel should be masked as NaN in the output maps.
fn finite_count_mask(image: &PixelImage, kernel: &Array2<f64>, _kernel_sum: f64) -> Array2<bool> {
    let finite = image.as_array().mapv(|v| if v.is_finite() { 1.0 } else { 0.0 });
    let conv = convolve2d_circular(&finite, kernel);
    conv.mapv(|v| v < 1.0)
}

fn downsample_indices(len: usize, step: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..len).step_by(step.max(1)).collect();
    if idx.len() % 2 != 0 {
        idx.pop();
    }
    if idx.is_empty() {
        idx.push(0);
    }
    idx
}

fn downsample(data: &Array2<f64>, rows: &[usize], cols: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), cols.len()), |(r, c)| data[[rows[r], cols[c]]])
}

/// Bilinear upsample from `data`'s shape to `(out_h, out_w)`.
fn upsample_bilinear(data: &Array2<f64>, out_h: usize, out_w: usize) -> Array2<f64> {
    let (in_h, in_w) = data.dim();
    if in_h == 0 || in_w == 0 {
        return Array2::from_elem((out_h, out_w), f64::NAN);
    }
    let scale_r = in_h as f64 / out_h as f64;
    let scale_c = in_w as f64 / out_w as f64;

    Array2::from_shape_fn((out_h, out_w), |(r, c)| {
        let sr = (r as f64 + 0.5) * scale_r - 0.5;
        let sc = (c as f64 + 0.5) * scale_c - 0.5;
        let r0 = sr.floor().clamp(0.0, (in_h - 1) as f64) as usize;
        let c0 = sc.floor().clamp(0.0, (in_w - 1) as f64) as usize;
        let r1 = (r0 + 1).min(in_h - 1);
        let c1 = (c0 + 1).min(in_w - 1);
        let fr = (sr - r0 as f64).clamp(0.0, 1.0);
        let fc = (sc - c0 as f64).clamp(0.0, 1.0);

        let top = data[[r0, c0]] * (1.0 - fc) + data[[r0, c1]] * fc;
        let bottom = data[[r1, c0]] * (1.0 - fc) + data[[r1, c1]] * fc;
        top * (1.0 - fr) + bottom * fr
    })
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut v: Vec<f64> = values.filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Standard normal sample via Box-Muller, using the crate's seeded RNG
/// rather than pulling in `rand_distr` for a single distribution.
fn sample_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn downsample_picks_even_length() {
        let idx = downsample_indices(17, 3);
        assert_eq!(idx.len() % 2, 0);
    }

    #[test]
    fn upsample_preserves_constant_field() {
        let data = Array2::<f64>::from_elem((4, 4), 7.0);
        let up = upsample_bilinear(&data, 16, 16);
        for v in up.iter() {
            assert!((v - 7.0).abs() < 1e-9);
        }
    }

    #[test]
    fn background_estimate_smooths_and_masks_nan() {
        let mut data = arr2(&[[0.0f32; 32]; 32]);
        for r in 0..32 {
            for c in 0..32 {
                data[[r, c]] = 1.0 + 0.01 * ((r + c) as f32).sin();
            }
        }
        data[[5, 5]] = f32::NAN;
        let image = PixelImage::new(data);
        let cfg = EngineConfig::default();
        let beam = PixelBeam::new(4.0, 4.0, 0.0);
        let maps = estimate(&image, Some(beam), &cfg).unwrap();
        assert_eq!(maps.background.dim(), (32, 32));
        assert!(maps.background[[5, 5]].is_nan());
    }
}
