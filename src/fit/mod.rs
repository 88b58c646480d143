//! Non-linear least-squares fitting of the multi-Gaussian model.

pub mod lm;
pub mod model;

use crate::summit::ComponentSeed;

/// Result of attempting to fit an island's components.
///
/// Replaces the duck-typed "dummy fitter" stand-in the original used for the
/// no-fit path: callers match on the variant instead of probing an object
/// for fitter-shaped methods.
#[derive(Clone, Debug)]
pub enum FitOutcome {
    /// The optimizer ran and (possibly) converged.
    Fitted(lm::FitResult),
    /// Fitting was not attempted; the seed values are propagated unchanged
    /// with all errors reported as `-1`.
    Skipped { params: Vec<f64> },
}

/// Fits every component seeded in `seeds` jointly against the island's finite
/// pixels. Returns [`FitOutcome::Skipped`] when free parameters exceed the
/// number of finite pixels (under-determined).
pub fn fit_island(
    seeds: &[ComponentSeed],
    points: &[(f64, f64, f64, f64)],
) -> FitOutcome {
    let initial: Vec<f64> = seeds.iter().flat_map(|s| s.initial.to_array()).collect();
    let bounds: Vec<lm::ParamBound> = seeds.iter().flat_map(|s| s.bounds()).collect();

    let free_count = bounds.iter().filter(|b| !b.fixed).count();
    if free_count > points.len() {
        return FitOutcome::Skipped { params: initial };
    }

    let result = lm::fit_lm(&initial, &bounds, points);
    FitOutcome::Fitted(result)
}
