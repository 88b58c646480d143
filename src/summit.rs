//! Summit estimation: within an island, locate initial Gaussian-component
//! seeds from the curvature map and island shape.

use ndarray::Array2;

use crate::catalog::ComponentFlags;
use crate::consts::FWHM_TO_SIGMA;
use crate::fit::lm::ParamBound;
use crate::fit::model::GaussianParams;
use crate::geometry::{pa_limit, PixelBeam, WcsProvider};
use crate::segment::{label_components, Island};

/// An initial Gaussian component guess plus its box constraints and flags.
#[derive(Clone, Debug)]
pub struct ComponentSeed {
    pub initial: GaussianParams,
    pub amp_bounds: (f64, f64),
    pub xo_bounds: (f64, f64),
    pub yo_bounds: (f64, f64),
    pub sx_bounds: (f64, f64),
    pub sy_bounds: (f64, f64),
    pub theta_bounds: (f64, f64),
    /// sx, sy, theta are held at the pixel-beam values.
    pub fixed_shape: bool,
    /// every parameter is held fixed (beyond `max_summits`).
    pub fixed_all: bool,
    pub flags: ComponentFlags,
}

impl ComponentSeed {
    /// Box constraints for `[amp, xo, yo, sx, sy, theta]`, honoring
    /// `fixed_shape`/`fixed_all`.
    pub fn bounds(&self) -> [ParamBound; 6] {
        let pos_fixed = self.fixed_all;
        let shape_fixed = self.fixed_all || self.fixed_shape;
        [
            ParamBound { lo: self.amp_bounds.0, hi: self.amp_bounds.1, fixed: pos_fixed },
            ParamBound { lo: self.xo_bounds.0, hi: self.xo_bounds.1, fixed: pos_fixed },
            ParamBound { lo: self.yo_bounds.0, hi: self.yo_bounds.1, fixed: pos_fixed },
            ParamBound { lo: self.sx_bounds.0, hi: self.sx_bounds.1, fixed: shape_fixed },
            ParamBound { lo: self.sy_bounds.0, hi: self.sy_bounds.1, fixed: shape_fixed },
            ParamBound { lo: self.theta_bounds.0, hi: self.theta_bounds.1, fixed: shape_fixed },
        ]
    }
}

/// Derives initial [`ComponentSeed`]s for an island.
pub struct SummitEstimator<'a> {
    pub seed_clip: f64,
    pub flood_clip: f64,
    pub telescope_latitude: Option<f64>,
    pub max_summits: Option<usize>,
    pub wcs: Option<&'a dyn WcsProvider>,
}

impl<'a> SummitEstimator<'a> {
    pub fn estimate(
        &self,
        island: &Island,
        curvature_sign: &Array2<i8>,
        pixel_beam: Option<PixelBeam>,
    ) -> (Vec<ComponentSeed>, ComponentFlags) {
        let mut base_flags = ComponentFlags::NONE;
        let beam = match pixel_beam {
            Some(b) => b,
            None => {
                base_flags |= ComponentFlags::WCSERR;
                PixelBeam::new(1.0, 1.0, 0.0)
            }
        };

        let finite: Vec<f64> = island
            .pixels
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect();
        if finite.is_empty() {
            return (Vec::new(), base_flags | ComponentFlags::NOTFIT);
        }
        let isnegative = finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max) < 0.0;

        let non_nan_pix = finite.len();
        if non_nan_pix <= 3 {
            // Too few pixels to fit anything; report the seed estimate as-is
            // rather than dropping the island silently.
            let seeds = self
                .seed_from_island_extremum(
                    island,
                    isnegative,
                    &beam,
                    base_flags | ComponentFlags::NOTFIT | ComponentFlags::FITERRSMALL,
                )
                .into_iter()
                .collect();
            return (seeds, base_flags);
        }
        let small_island_flag = if non_nan_pix <= 6 {
            ComponentFlags::FIXED2PSF
        } else {
            ComponentFlags::NONE
        };

        let xo_lim = 0.5 * beam.major_px.hypot(beam.minor_px);
        let height = island.height();
        let width = island.width();

        let force_single_point_source =
            small_island_flag.contains(ComponentFlags::FIXED2PSF) || height.min(width) <= 2;

        let summits: Vec<(usize, usize, usize, usize)> = if force_single_point_source {
            vec![(0, height - 1, 0, width - 1)]
        } else {
            self.extract_summit_regions(island, curvature_sign, isnegative)
        };

        let mut seeds: Vec<ComponentSeed> = summits
            .into_iter()
            .filter_map(|bbox| {
                self.seed_from_summit(
                    island,
                    bbox,
                    isnegative,
                    &beam,
                    xo_lim,
                    force_single_point_source,
                    base_flags | small_island_flag,
                )
            })
            .collect();

        // Descending order of |peak| amplitude.
        seeds.sort_by(|a, b| {
            b.initial
                .amp
                .abs()
                .partial_cmp(&a.initial.amp.abs())
                .unwrap()
        });

        if let Some(max) = self.max_summits {
            for seed in seeds.iter_mut().skip(max) {
                seed.fixed_all = true;
                seed.flags |= ComponentFlags::FIXED2PSF | ComponentFlags::NOTFIT;
            }
        }

        (seeds, base_flags)
    }

    /// Connected sub-regions of curvature-classified, sign-consistent pixels
    /// within the island, expressed as island-local `(row_min, row_max,
    /// col_min, col_max)` bounding boxes.
    fn extract_summit_regions(
        &self,
        island: &Island,
        curvature_sign: &Array2<i8>,
        isnegative: bool,
    ) -> Vec<(usize, usize, usize, usize)> {
        let (h, w) = island.pixels.dim();
        let target_sign: i8 = if isnegative { 1 } else { -1 };
        let mask = Array2::from_shape_fn((h, w), |(r, c)| {
            let data = island.pixels[[r, c]] as f64;
            let rms = island.rms[[r, c]] as f64;
            if !data.is_finite() || !rms.is_finite() || curvature_sign[[r, c]] != target_sign {
                return false;
            }
            if isnegative {
                data + self.flood_clip * rms < 0.0
            } else {
                data - self.flood_clip * rms > 0.0
            }
        });

        let labels = label_components(&mask);
        let mut boxes: std::collections::HashMap<u32, (usize, usize, usize, usize)> =
            std::collections::HashMap::new();
        for r in 0..h {
            for c in 0..w {
                let lbl = labels[[r, c]];
                if lbl == 0 {
                    continue;
                }
                let entry = boxes.entry(lbl).or_insert((r, r, c, c));
                entry.0 = entry.0.min(r);
                entry.1 = entry.1.max(r);
                entry.2 = entry.2.min(c);
                entry.3 = entry.3.max(c);
            }
        }
        boxes.into_values().collect()
    }

    fn seed_from_summit(
        &self,
        island: &Island,
        bbox: (usize, usize, usize, usize),
        isnegative: bool,
        beam: &PixelBeam,
        xo_lim: f64,
        force_point_source: bool,
        mut flags: ComponentFlags,
    ) -> Option<ComponentSeed> {
        let (row_min, row_max, col_min, col_max) = bbox;

        let mut extremum = f64::NAN;
        let mut peak_row = row_min;
        let mut peak_col = col_min;
        for r in row_min..=row_max {
            for c in col_min..=col_max {
                let v = island.pixels[[r, c]] as f64;
                if !v.is_finite() {
                    continue;
                }
                let better = if extremum.is_nan() {
                    true
                } else if isnegative {
                    v < extremum
                } else {
                    v > extremum
                };
                if better {
                    extremum = v;
                    peak_row = r;
                    peak_col = c;
                }
            }
        }
        if extremum.is_nan() {
            return None;
        }
        let amp = extremum;

        let mut max_snr = f64::NEG_INFINITY;
        for r in row_min..=row_max {
            for c in col_min..=col_max {
                let d = island.pixels[[r, c]] as f64;
                let rms = island.rms[[r, c]] as f64;
                if d.is_finite() && rms.is_finite() && rms > 0.0 {
                    max_snr = max_snr.max((d / rms).abs());
                }
            }
        }
        if max_snr < self.seed_clip {
            return None;
        }

        let rms_at_peak = island.rms[[peak_row, peak_col]] as f64;
        let (amp_min, amp_max) = if amp > 0.0 {
            (
                0.95 * (self.flood_clip * rms_at_peak).min(amp),
                amp * 1.05 + self.seed_clip * rms_at_peak,
            )
        } else {
            (
                amp * 1.05 - self.seed_clip * rms_at_peak,
                0.95 * (-self.flood_clip * rms_at_peak).max(amp),
            )
        };

        // x = column coordinate, y = row coordinate, both in island-local
        // pixel space (the orchestrator offsets by the island's bbox before
        // WCS conversion and reporting).
        let xo = peak_col as f64;
        let yo = peak_row as f64;
        let (mut xo_min, mut xo_max) = (
            (col_min as f64).max(xo - xo_lim),
            (col_max as f64).min(xo + xo_lim),
        );
        if xo_min == xo_max {
            xo_min -= 0.5;
            xo_max += 0.5;
        }
        let (mut yo_min, mut yo_max) = (
            (row_min as f64).max(yo - xo_lim),
            (row_max as f64).min(yo + xo_lim),
        );
        if yo_min == yo_max {
            yo_min -= 0.5;
            yo_max += 0.5;
        }

        let mut major = beam.major_px * FWHM_TO_SIGMA;
        let minor = beam.minor_px * FWHM_TO_SIGMA;
        if let (Some(lat), Some(wcs)) = (self.telescope_latitude, self.wcs) {
            let full_x = island.bbox.2 as f64 + xo;
            let full_y = island.bbox.0 as f64 + yo;
            if let Some((_, dec)) = wcs.pix_to_sky(full_x, full_y) {
                major /= (dec - lat).to_radians().cos();
            }
        }

        let xsize = (row_max - row_min + 1) as f64;
        let ysize = (col_max - col_min + 1) as f64;
        let span_bound = (xsize.max(ysize) + 1.0) * std::f64::consts::SQRT_2 * FWHM_TO_SIGMA;
        let major_min = major * 0.8;
        let major_max = span_bound.max(major * 1.1);
        let minor_min = minor * 0.8;
        let minor_max = span_bound.max(major * 1.1);

        let mut fixed_shape = force_point_source;
        if minor_min == minor_max || major_min == major_max {
            fixed_shape = true;
        }
        if fixed_shape {
            flags |= ComponentFlags::FIXED2PSF;
        }

        let pa = pa_limit(beam.pa_deg).to_radians();

        Some(ComponentSeed {
            initial: GaussianParams {
                amp,
                xo,
                yo,
                sx: major,
                sy: minor,
                theta: pa,
            },
            amp_bounds: (amp_min.min(amp_max), amp_min.max(amp_max)),
            xo_bounds: (xo_min, xo_max),
            yo_bounds: (yo_min, yo_max),
            sx_bounds: (major_min, major_max),
            sy_bounds: (minor_min, minor_max),
            theta_bounds: (-std::f64::consts::PI, std::f64::consts::PI),
            fixed_shape,
            fixed_all: false,
            flags,
        })
    }

    /// Builds a single seed from the island's extreme pixel, every parameter
    /// fixed at its seed value. Used when the island has too few finite
    /// pixels to support any free parameter at all.
    fn seed_from_island_extremum(
        &self,
        island: &Island,
        isnegative: bool,
        beam: &PixelBeam,
        flags: ComponentFlags,
    ) -> Option<ComponentSeed> {
        let (h, w) = island.pixels.dim();
        let mut extremum = f64::NAN;
        let mut peak_row = 0;
        let mut peak_col = 0;
        for r in 0..h {
            for c in 0..w {
                let v = island.pixels[[r, c]] as f64;
                if !v.is_finite() {
                    continue;
                }
                let better = if extremum.is_nan() {
                    true
                } else if isnegative {
                    v < extremum
                } else {
                    v > extremum
                };
                if better {
                    extremum = v;
                    peak_row = r;
                    peak_col = c;
                }
            }
        }
        if extremum.is_nan() {
            return None;
        }

        let xo = peak_col as f64;
        let yo = peak_row as f64;
        let major = beam.major_px * FWHM_TO_SIGMA;
        let minor = beam.minor_px * FWHM_TO_SIGMA;
        let pa = pa_limit(beam.pa_deg).to_radians();

        Some(ComponentSeed {
            initial: GaussianParams {
                amp: extremum,
                xo,
                yo,
                sx: major,
                sy: minor,
                theta: pa,
            },
            amp_bounds: (extremum, extremum),
            xo_bounds: (xo, xo),
            yo_bounds: (yo, yo),
            sx_bounds: (major, major),
            sy_bounds: (minor, minor),
            theta_bounds: (pa, pa),
            fixed_shape: true,
            fixed_all: true,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curvature::CurvatureMap;
    use crate::segment::IslandSegmenter;
    use ndarray::Array2;

    fn gaussian_image(h: usize, w: usize, amp: f32, xo: f32, yo: f32, sigma: f32) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(r, c)| {
            let dx = c as f32 - xo;
            let dy = r as f32 - yo;
            amp * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn single_gaussian_yields_one_seed() {
        let data = gaussian_image(64, 64, 1.0, 32.0, 32.0, 3.0);
        let rms = Array2::<f32>::from_elem((64, 64), 0.01);
        let islands = IslandSegmenter::new(5.0, 4.0).segment(&data, &rms, None);
        assert_eq!(islands.len(), 1);
        let island = &islands[0];

        let cm = CurvatureMap::compute(&data, None);
        let (row_min, row_max, col_min, col_max) = island.bbox;
        let sign_slice = cm
            .sign
            .slice(ndarray::s![row_min..=row_max, col_min..=col_max])
            .to_owned();

        let est = SummitEstimator {
            seed_clip: 5.0,
            flood_clip: 4.0,
            telescope_latitude: None,
            max_summits: None,
            wcs: None,
        };
        let beam = PixelBeam::new(6.0, 6.0, 0.0);
        let (seeds, _flags) = est.estimate(island, &sign_slice, Some(beam));
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].initial.amp > 0.5);
    }

    #[test]
    fn tiny_island_is_not_fit() {
        let mut data = Array2::<f32>::from_elem((64, 64), f32::NAN);
        data[[10, 10]] = 1.0;
        data[[10, 11]] = 1.0;
        data[[11, 10]] = 1.0;
        let rms = Array2::<f32>::from_elem((64, 64), 0.1);
        // Build a synthetic island directly rather than via the segmenter.
        let pixels = data.slice(ndarray::s![9..13, 9..13]).to_owned();
        let rms_crop = rms.slice(ndarray::s![9..13, 9..13]).to_owned();
        let island = crate::segment::Island {
            id: 0,
            bbox: (9, 12, 9, 12),
            pixels,
            rms: rms_crop,
            seed_row: 10,
            seed_col: 10,
        };
        let sign = Array2::<i8>::zeros((4, 4));
        let est = SummitEstimator {
            seed_clip: 5.0,
            flood_clip: 4.0,
            telescope_latitude: None,
            max_summits: None,
            wcs: None,
        };
        let (seeds, _flags) = est.estimate(&island, &sign, Some(PixelBeam::new(2.0, 2.0, 0.0)));
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].flags.contains(ComponentFlags::NOTFIT));
        assert!(seeds[0].flags.contains(ComponentFlags::FITERRSMALL));
        assert!(seeds[0].fixed_all);
    }
}
