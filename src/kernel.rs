//! Builds the circular top-hat averaging kernel used by the FFT background
//! estimator.

use ndarray::Array2;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::geometry::PixelBeam;

/// A top-hat kernel plus the bookkeeping the background estimator needs to
/// use it: the pixel sum (for normalizing the averaging convolution) and the
/// downsampling stride derived alongside it.
pub struct TopHatKernel {
    pub kernel: Array2<f64>,
    pub kernel_sum: f64,
    pub step_size: i64,
}

/// Constructs [`TopHatKernel`]s sized from a beam and `EngineConfig`'s
/// `step_size`/`box_size` (both expressed in "per beam" units).
pub struct KernelBuilder;

impl KernelBuilder {
    /// `pixel_beam` is required: the kernel's pixel radius is derived from
    /// the beam's minor axis in pixels. Returns [`EngineError::MissingBeam`]
    /// if none is available.
    pub fn build(pixel_beam: Option<PixelBeam>, config: &EngineConfig) -> Result<TopHatKernel> {
        let beam = pixel_beam.ok_or_else(|| {
            EngineError::MissingBeam(
                "no pixel beam available; supply an explicit box/step size in pixels".into(),
            )
        })?;

        let pix_per_beam = beam.minor_px;
        let npix_step = config.step_size.unsigned_abs().max(1) as f64;
        let step_size = (pix_per_beam / npix_step).ceil().max(1.0) as i64;

        let npix_box = config.box_size.unsigned_abs().max(1) as f64;
        let box_size_px = (pix_per_beam * npix_box / step_size as f64).ceil().max(1.0) as i64;

        let radius = (box_size_px / 2).max(0);
        let kernel = tophat_kernel(radius);
        let kernel_sum = kernel.sum();

        Ok(TopHatKernel {
            kernel,
            kernel_sum,
            step_size,
        })
    }
}

/// A circular disc of 1s inside radius `radius` (inclusive), 0 elsewhere, in
/// a `(2*radius+1, 2*radius+1)` array.
fn tophat_kernel(radius: i64) -> Array2<f64> {
    let r = radius.max(0);
    let side = (2 * r + 1) as usize;
    let r2 = (r * r) as i64;
    Array2::from_shape_fn((side, side), |(row, col)| {
        let y = row as i64 - r;
        let x = col as i64 - r;
        if x * x + y * y <= r2 {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_zero_is_single_pixel() {
        let k = tophat_kernel(0);
        assert_eq!(k.dim(), (1, 1));
        assert_eq!(k.sum(), 1.0);
    }

    #[test]
    fn radius_one_is_plus_shape() {
        let k = tophat_kernel(1);
        assert_eq!(k.dim(), (3, 3));
        // corners excluded (2 > 1), center + 4 edges included.
        assert_eq!(k.sum(), 5.0);
    }

    #[test]
    fn missing_beam_is_reported() {
        let cfg = EngineConfig::default();
        let result = KernelBuilder::build(None, &cfg);
        assert!(matches!(result, Err(EngineError::MissingBeam(_))));
    }

    #[test]
    fn builds_kernel_from_beam() {
        let cfg = EngineConfig::default();
        let beam = PixelBeam::new(6.0, 6.0, 0.0);
        let tk = KernelBuilder::build(Some(beam), &cfg).unwrap();
        assert!(tk.kernel.dim().0 > 0);
        assert!(tk.kernel_sum > 0.0);
        assert!(tk.step_size >= 1);
    }
}
