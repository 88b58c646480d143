//! The multi-Gaussian model evaluated during fitting: sum of elliptical
//! 2D Gaussians, plus a numerical (forward-difference) Jacobian.

use crate::consts::LM_JACOBIAN_EPS;

/// A single elliptical Gaussian component's parameters, pixel units, angles
/// in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianParams {
    pub amp: f64,
    pub xo: f64,
    pub yo: f64,
    pub sx: f64,
    pub sy: f64,
    pub theta: f64,
}

impl GaussianParams {
    pub const N: usize = 6;

    pub fn to_array(self) -> [f64; 6] {
        [self.amp, self.xo, self.yo, self.sx, self.sy, self.theta]
    }

    pub fn from_array(a: [f64; 6]) -> Self {
        Self {
            amp: a[0],
            xo: a[1],
            yo: a[2],
            sx: a[3],
            sy: a[4],
            theta: a[5],
        }
    }

    /// Evaluate this single component at pixel (x, y).
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        elliptical_gaussian(x, y, self.amp, self.xo, self.yo, self.sx, self.sy, self.theta)
    }
}

/// Evaluate an elliptical 2D Gaussian at `(x, y)`. `theta` is in radians,
/// measured counter-clockwise from the x-axis; `sx`/`sy` are sigmas.
pub fn elliptical_gaussian(x: f64, y: f64, amp: f64, xo: f64, yo: f64, sx: f64, sy: f64, theta: f64) -> f64 {
    let (sint, cost) = theta.sin_cos();
    let dx = x - xo;
    let dy = y - yo;
    let a = (dx * cost + dy * sint) / sx;
    let b = (dx * sint - dy * cost) / sy;
    let exponent = -0.5 * (a * a + b * b);
    amp * exponent.exp()
}

/// A multi-component model: flattened parameter vector of length
/// `6 * components.len()`.
#[derive(Clone, Debug)]
pub struct MultiGaussianModel {
    pub components: Vec<GaussianParams>,
}

impl MultiGaussianModel {
    pub fn from_flat(flat: &[f64]) -> Self {
        assert_eq!(flat.len() % GaussianParams::N, 0);
        let components = flat
            .chunks_exact(GaussianParams::N)
            .map(|c| GaussianParams::from_array([c[0], c[1], c[2], c[3], c[4], c[5]]))
            .collect();
        Self { components }
    }

    pub fn to_flat(&self) -> Vec<f64> {
        self.components.iter().flat_map(|c| c.to_array()).collect()
    }

    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.components.iter().map(|c| c.eval(x, y)).sum()
    }
}

/// Forward-difference Jacobian of the residual vector
/// `r_i = (model(x_i,y_i; params) - data_i) / rms_i` with respect to each
/// parameter in `flat_params`, evaluated only at the `free` indices (others
/// are skipped and left as zero columns since they never move).
///
/// `points` is `(x, y, data, rms)` for each finite pixel.
pub fn numerical_jacobian(
    flat_params: &[f64],
    free: &[usize],
    points: &[(f64, f64, f64, f64)],
) -> Vec<Vec<f64>> {
    let base_model = MultiGaussianModel::from_flat(flat_params);
    let base_residuals: Vec<f64> = points
        .iter()
        .map(|&(x, y, data, rms)| (base_model.eval(x, y) - data) / rms)
        .collect();

    let mut jac = vec![vec![0.0; free.len()]; points.len()];
    for (col, &idx) in free.iter().enumerate() {
        let mut perturbed = flat_params.to_vec();
        let step = LM_JACOBIAN_EPS.max(LM_JACOBIAN_EPS * perturbed[idx].abs());
        perturbed[idx] += step;
        let model = MultiGaussianModel::from_flat(&perturbed);
        for (row, &(x, y, data, rms)) in points.iter().enumerate() {
            let r = (model.eval(x, y) - data) / rms;
            jac[row][col] = (r - base_residuals[row]) / step;
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_gaussian_peaks_at_center() {
        let g = GaussianParams {
            amp: 2.0,
            xo: 5.0,
            yo: 5.0,
            sx: 1.0,
            sy: 1.0,
            theta: 0.0,
        };
        assert_relative_eq!(g.eval(5.0, 5.0), 2.0, epsilon = 1e-12);
        assert!(g.eval(5.0, 5.0) > g.eval(6.0, 5.0));
    }

    #[test]
    fn multi_model_sums_components() {
        let model = MultiGaussianModel::from_flat(&[
            1.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, 1.0, 1.0, 0.0,
        ]);
        assert_relative_eq!(model.eval(0.0, 0.0), 2.0, epsilon = 1e-12);
    }
}
