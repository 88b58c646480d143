//! 2D FFT helpers used by the background estimator's top-hat convolution.
//!
//! Runs single-threaded per call: island-level Rayon parallelism is the one
//! level of parallelism this crate uses, so FFT convolution never spawns its
//! own row/column parallelism on top of it (see the background estimator's
//! call sites, which are invoked from sequential orchestrator code, not from
//! inside a `par_iter` closure).

use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

/// Forward 2D FFT: row transform followed by column transform.
pub fn fft2d_forward(data: &Array2<f64>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = Array2::<Complex<f64>>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            result[[row, col]] = Complex::new(data[[row, col]], 0.0);
        }
    }

    for row in 0..h {
        let mut row_data: Vec<Complex<f64>> = (0..w).map(|c| result[[row, c]]).collect();
        fft_row.process(&mut row_data);
        for col in 0..w {
            result[[row, col]] = row_data[col];
        }
    }
    for col in 0..w {
        let mut col_data: Vec<Complex<f64>> = (0..h).map(|r| result[[r, col]]).collect();
        fft_col.process(&mut col_data);
        for row in 0..h {
            result[[row, col]] = col_data[row];
        }
    }

    result
}

/// Inverse 2D FFT, returning the real part normalized by `1/(h*w)`.
pub fn ifft2d_inverse(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();

    for col in 0..w {
        let mut col_data: Vec<Complex<f64>> = (0..h).map(|r| work[[r, col]]).collect();
        ifft_col.process(&mut col_data);
        for row in 0..h {
            work[[row, col]] = col_data[row];
        }
    }
    for row in 0..h {
        let mut row_data: Vec<Complex<f64>> = (0..w).map(|c| work[[row, c]]).collect();
        ifft_row.process(&mut row_data);
        for col in 0..w {
            work[[row, col]] = row_data[col];
        }
    }

    let scale = 1.0 / (h * w) as f64;
    let mut result = Array2::<f64>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            result[[row, col]] = work[[row, col]].re * scale;
        }
    }
    result
}

/// Circular convolution of `image` with `kernel` via the FFT, matching the
/// original estimator's `fft_average`: the kernel is embedded into a
/// zero-padded buffer the size of `image`, centered so that convolution acts
/// as a local spatial average rather than shifting the image.
pub fn convolve2d_circular(image: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (h, w) = image.dim();
    let (kh, kw) = kernel.dim();
    assert!(kh <= h && kw <= w, "kernel must not exceed image size");

    let mut padded = Array2::<f64>::zeros((h, w));
    let row_off = h / 2 - kh / 2;
    let col_off = w / 2 - kw / 2;
    for r in 0..kh {
        for c in 0..kw {
            padded[[(row_off + r) % h, (col_off + c) % w]] = kernel[[r, c]];
        }
    }

    let image_fft = fft2d_forward(image);
    let kernel_fft = fft2d_forward(&padded);
    let mut product = Array2::<Complex<f64>>::zeros((h, w));
    for r in 0..h {
        for c in 0..w {
            product[[r, c]] = image_fft[[r, c]] * kernel_fft[[r, c]];
        }
    }
    let convolved = ifft2d_inverse(&product);

    // Undo the centering shift introduced by embedding the kernel at its own
    // center rather than at the origin.
    let mut out = Array2::<f64>::zeros((h, w));
    let shift_r = row_off;
    let shift_c = col_off;
    for r in 0..h {
        for c in 0..w {
            out[[r, c]] = convolved[[(r + shift_r) % h, (c + shift_c) % w]];
        }
    }
    out
}
