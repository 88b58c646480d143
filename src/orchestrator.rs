//! Drives the pipeline stages end to end and aggregates the results into a
//! catalog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::background;
use crate::catalog::{CatalogEntry, ComponentFlags, FittedComponent, IslandSummary};
use crate::config::{EngineConfig, PriorizedStage};
use crate::consts::{PARALLEL_ISLAND_THRESHOLD, SIGMA_TO_FWHM};
use crate::curvature::CurvatureMap;
use crate::errors_condon::condon_errors;
use crate::error::{EngineError, Result};
use crate::fit::model::GaussianParams;
use crate::fit::{fit_island, FitOutcome};
use crate::geometry::{pa_limit, BeamProvider, PixelBeam, WcsProvider};
use crate::image::PixelImage;
use crate::segment::{Island, IslandSegmenter};
use crate::summit::SummitEstimator;

/// Cooperative cancellation flag, checked once per island before dispatch.
pub type CancellationToken = Arc<AtomicBool>;

/// The single writer of completed catalog rows. Implementations typically
/// forward to a FITS table, CSV, or VOTable writer (all out of scope here).
pub trait CatalogSink: Send + Sync {
    fn send(&self, entry: CatalogEntry) -> Result<()>;
}

/// An immutable per-image value bundling everything a fit task needs to read
/// concurrently: the source image, the derived background/RMS/curvature
/// maps, and the beam. Replaces the mutable global state the distilled
/// source relied on; workers hold this by `Arc` reference only.
pub struct ImageContext {
    pub image: PixelImage,
    pub background: Array2<f32>,
    pub rms: Array2<f32>,
    pub curvature: CurvatureMap,
    pub pixel_beam: Option<PixelBeam>,
    pub config: EngineConfig,
    /// Optional sky-region mask, same shape as `image`, produced upstream by
    /// converting a sky-region mask through a `WcsProvider` once per image.
    /// Islands with no member pixel inside the mask are dropped entirely.
    pub sky_mask: Option<Array2<bool>>,
}

impl ImageContext {
    pub fn build(
        image: PixelImage,
        beam_provider: &dyn BeamProvider,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::build_with_mask(image, beam_provider, config, None)
    }

    pub fn build_with_mask(
        image: PixelImage,
        beam_provider: &dyn BeamProvider,
        config: EngineConfig,
        sky_mask: Option<Array2<bool>>,
    ) -> Result<Self> {
        config.validate()?;
        let pixel_beam = beam_provider.pixel_beam();
        let maps = background::estimate(&image, pixel_beam, &config)?;
        let curvature = CurvatureMap::compute(image.as_array(), None);
        Ok(Self {
            image,
            background: maps.background,
            rms: maps.rms,
            curvature,
            pixel_beam,
            config,
            sky_mask,
        })
    }
}

/// Sequences `KernelBuilder -> BackgroundEstimator -> CurvatureMap ->
/// IslandSegmenter -> (per island) SummitEstimator -> GaussianFitter ->
/// ErrorEstimator`.
pub struct Orchestrator<'a> {
    pub wcs: &'a dyn WcsProvider,
    pub beam_provider: &'a dyn BeamProvider,
}

impl<'a> Orchestrator<'a> {
    /// Runs detection-mode source finding over `image` and delivers the
    /// resulting catalog rows to `sink` in `(island_id, component_index)`
    /// order.
    pub fn run(
        &self,
        image: PixelImage,
        config: EngineConfig,
        sink: Arc<dyn CatalogSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.run_with_mask(image, config, None, sink, cancel)
    }

    /// Same as `run`, but restricts the search to islands with at least one
    /// pixel inside `sky_mask` (same shape as `image`). Islands entirely
    /// outside the mask are dropped before fitting.
    pub fn run_with_mask(
        &self,
        image: PixelImage,
        config: EngineConfig,
        sky_mask: Option<Array2<bool>>,
        sink: Arc<dyn CatalogSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let ctx = ImageContext::build_with_mask(image, self.beam_provider, config, sky_mask)?;
        info!(height = ctx.image.shape().0, width = ctx.image.shape().1, "image context ready");

        let segmenter = IslandSegmenter::new(ctx.config.seed_clip, ctx.config.flood_clip);
        let islands = segmenter.segment(ctx.image.as_array(), &ctx.rms, ctx.sky_mask.as_ref());
        info!(island_count = islands.len(), "segmentation complete");

        let per_island: Vec<Option<Vec<FittedComponent>>> = if islands.len() >= PARALLEL_ISLAND_THRESHOLD {
            islands
                .par_iter()
                .map(|isl| self.process_island(isl, &ctx, &cancel))
                .collect()
        } else {
            islands.iter().map(|isl| self.process_island(isl, &ctx, &cancel)).collect()
        };

        if per_island.iter().any(Option::is_none) {
            return Err(EngineError::Cancelled);
        }

        let (tx, rx) = crossbeam_channel::bounded::<CatalogEntry>(256);
        let writer_sink = Arc::clone(&sink);
        let writer = std::thread::spawn(move || -> Result<()> {
            for entry in rx {
                writer_sink.send(entry)?;
            }
            Ok(())
        });

        for (components, island) in per_island.into_iter().flatten().zip(islands.iter()) {
            let count = components.len();
            for component in components {
                tx.send(CatalogEntry::Component(component))
                    .map_err(|_| EngineError::Config("catalog sink channel closed early".into()))?;
            }
            if ctx.config.compute_island_summaries {
                if let Some(summary) = self.summarize_island(island, &ctx, count) {
                    tx.send(CatalogEntry::IslandSummary(summary))
                        .map_err(|_| EngineError::Config("catalog sink channel closed early".into()))?;
                }
            }
        }
        drop(tx);
        writer.join().map_err(|_| EngineError::Config("catalog writer thread panicked".into()))??;

        Ok(())
    }

    fn process_island(
        &self,
        island: &Island,
        ctx: &ImageContext,
        cancel: &CancellationToken,
    ) -> Option<Vec<FittedComponent>> {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }

        let (row_min, row_max, col_min, col_max) = island.bbox;
        let curvature_slice = ctx
            .curvature
            .sign
            .slice(ndarray::s![row_min..=row_max, col_min..=col_max])
            .to_owned();

        let estimator = SummitEstimator {
            seed_clip: ctx.config.seed_clip,
            flood_clip: ctx.config.flood_clip,
            telescope_latitude: ctx.config.telescope_latitude,
            max_summits: ctx.config.max_summits,
            wcs: Some(self.wcs),
        };
        let (seeds, island_flags) = estimator.estimate(island, &curvature_slice, ctx.pixel_beam);
        if seeds.is_empty() {
            debug!(island = island.id, "no summits found");
            return Some(Vec::new());
        }

        let points: Vec<(f64, f64, f64, f64)> = island
            .pixels
            .indexed_iter()
            .filter_map(|((r, c), &v)| {
                if v.is_finite() {
                    let rms = island.rms[[r, c]];
                    Some((c as f64, r as f64, v as f64, rms as f64))
                } else {
                    None
                }
            })
            .collect();

        let outcome = fit_island(&seeds, &points);
        let mut components = Vec::with_capacity(seeds.len());
        match &outcome {
            FitOutcome::Fitted(result) => {
                for (i, seed) in seeds.iter().enumerate() {
                    let base = i * 6;
                    let mut flags = island_flags | seed.flags;
                    if !result.converged {
                        flags |= ComponentFlags::FITERR;
                    }
                    let bounds = seed.bounds();
                    let component = self.build_component(
                        island,
                        ctx,
                        &result.params[base..base + 6],
                        &bounds,
                        flags,
                        result.residual_mean,
                        result.residual_std,
                        i as u32,
                    );
                    components.push(component);
                }
            }
            FitOutcome::Skipped { params } => {
                for (i, seed) in seeds.iter().enumerate() {
                    let base = i * 6;
                    let flags = island_flags | seed.flags | ComponentFlags::NOTFIT;
                    let bounds = seed.bounds();
                    let component = self.build_component(
                        island,
                        ctx,
                        &params[base..base + 6],
                        &bounds,
                        flags,
                        0.0,
                        0.0,
                        i as u32,
                    );
                    components.push(component);
                }
            }
        }
        Some(components)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_component(
        &self,
        island: &Island,
        ctx: &ImageContext,
        params: &[f64],
        bounds: &[crate::fit::lm::ParamBound],
        mut flags: ComponentFlags,
        residual_mean: f64,
        residual_std: f64,
        source_index: u32,
    ) -> FittedComponent {
        let mut model = GaussianParams::from_array([
            params[0], params[1], params[2], params[3], params[4], params[5],
        ]);

        // Canonicalize: sx is the major axis.
        if model.sx < model.sy {
            std::mem::swap(&mut model.sx, &mut model.sy);
            model.theta += std::f64::consts::FRAC_PI_2;
        }
        let pa_deg = pa_limit(model.theta.to_degrees());

        let full_x = island.bbox.2 as f64 + model.xo;
        let full_y = island.bbox.0 as f64 + model.yo;

        let sky = self.wcs.pix_to_sky(full_x, full_y);
        let (ra_deg, dec_deg) = match sky {
            Some((ra, dec)) if ra.is_finite() && dec.is_finite() => {
                let ra_norm = ((ra % 360.0) + 360.0) % 360.0;
                (ra_norm, dec)
            }
            _ => {
                flags |= ComponentFlags::WCSERR;
                (0.0, 0.0)
            }
        };

        let major_fwhm_px = model.sx * SIGMA_TO_FWHM;
        let minor_fwhm_px = model.sy * SIGMA_TO_FWHM;
        let major_arcsec = self
            .wcs
            .pix_vector_to_sky(full_x, full_y, major_fwhm_px, model.theta.to_degrees())
            .map(|v| v.length_deg * 3600.0)
            .unwrap_or(major_fwhm_px);
        let minor_arcsec = self
            .wcs
            .pix_vector_to_sky(full_x, full_y, minor_fwhm_px, model.theta.to_degrees() + 90.0)
            .map(|v| v.length_deg * 3600.0)
            .unwrap_or(minor_fwhm_px);

        let beam_area_pix = ctx.pixel_beam.map(|b| {
            std::f64::consts::PI * b.major_px * b.minor_px / (4.0 * std::f64::consts::LN_2)
        });
        let int_flux = match beam_area_pix {
            Some(area) if area > 0.0 => {
                model.amp * model.sx * model.sy * SIGMA_TO_FWHM.powi(2) * std::f64::consts::PI / area
            }
            _ => model.amp,
        };

        let (h, w) = ctx.image.shape();
        let clamped_row = (full_y.round().max(0.0) as usize).min(h.saturating_sub(1));
        let clamped_col = (full_x.round().max(0.0) as usize).min(w.saturating_sub(1));
        let background_px = ctx.background[[clamped_row, clamped_col]] as f64;
        let local_rms = ctx.rms[[clamped_row, clamped_col]] as f64;

        let beam_area_deg2 = self.beam_provider.beam_at(ra_deg, dec_deg).area_deg2();
        let condon = condon_errors(
            major_arcsec,
            minor_arcsec,
            pa_deg,
            model.amp,
            local_rms,
            int_flux,
            beam_area_deg2,
        );

        let amp_fixed = bounds[0].fixed;
        let pos_fixed = bounds[1].fixed;
        let shape_fixed = bounds[3].fixed;

        FittedComponent {
            island: island.id,
            source: source_index,
            background: background_px,
            local_rms,
            ra_deg,
            err_ra_deg: if pos_fixed { -1.0 } else { condon.err_ra_deg },
            dec_deg,
            err_dec_deg: if pos_fixed { -1.0 } else { condon.err_dec_deg },
            peak_flux_jy_beam: model.amp,
            err_peak_flux_jy_beam: if amp_fixed { -1.0 } else { condon.err_peak_flux },
            int_flux_jy: int_flux,
            err_int_flux_jy: if amp_fixed || shape_fixed { -1.0 } else { condon.err_int_flux },
            major_arcsec,
            err_major_arcsec: if shape_fixed { -1.0 } else { condon.err_major_arcsec },
            minor_arcsec,
            err_minor_arcsec: if shape_fixed { -1.0 } else { condon.err_minor_arcsec },
            pa_deg,
            err_pa_deg: if shape_fixed { -1.0 } else { condon.err_pa_deg },
            flags,
            residual_mean,
            residual_std,
        }
    }

    fn summarize_island(&self, island: &Island, ctx: &ImageContext, component_count: usize) -> Option<IslandSummary> {
        let (ra, dec) = self.wcs.pix_to_sky(island.seed_col as f64, island.seed_row as f64)?;
        let corner_a = self.wcs.pix_to_sky(island.bbox.2 as f64, island.bbox.0 as f64)?;
        let corner_b = self.wcs.pix_to_sky(island.bbox.3 as f64, island.bbox.1 as f64)?;
        let max_angular_size_deg = great_circle_distance(corner_a, corner_b);

        let int_flux_jy: f64 = island
            .pixels
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .sum::<f64>()
            / ctx
                .pixel_beam
                .map(|b| std::f64::consts::PI * b.major_px * b.minor_px / (4.0 * std::f64::consts::LN_2))
                .unwrap_or(1.0);

        Some(IslandSummary {
            island: island.id,
            peak_ra_deg: ra,
            peak_dec_deg: dec,
            int_flux_jy,
            max_angular_size_deg,
            component_count,
        })
    }

    /// Priorized (forced-measurement) fitting: fit components at positions
    /// given by an external catalog rather than by detection.
    pub fn run_priorized(
        &self,
        image: &PixelImage,
        background: &Array2<f32>,
        rms: &Array2<f32>,
        inputs: &[PriorizedInput],
        stage: PriorizedStage,
    ) -> Vec<FittedComponent> {
        let mut results = Vec::with_capacity(inputs.len());

        for input in inputs {
            let Some((x, y)) = self.wcs.sky_to_pix(input.ra_deg, input.dec_deg) else {
                continue;
            };
            let pixel_scale_deg = self
                .beam_provider
                .pixel_scale_deg()
                .map(|(sx, _)| sx.abs())
                .filter(|v| *v > 0.0)
                .unwrap_or(1.0 / 3600.0);
            let sx_px = (input.major_arcsec / 3600.0 / pixel_scale_deg) * crate::consts::FWHM_TO_SIGMA;
            let half_width = (2.0 * sx_px + 1.0).max(3.0) as usize / 2 + 1;
            let row = y.round() as isize;
            let col = x.round() as isize;
            let (h, w) = image.shape();
            let row_min = (row - half_width as isize).max(0) as usize;
            let row_max = (row + half_width as isize).min(h as isize - 1) as usize;
            let col_min = (col - half_width as isize).max(0) as usize;
            let col_max = (col + half_width as isize).min(w as isize - 1) as usize;
            if row_min >= row_max || col_min >= col_max {
                continue;
            }

            let points: Vec<(f64, f64, f64, f64)> = (row_min..=row_max)
                .flat_map(|r| (col_min..=col_max).map(move |c| (r, c)))
                .filter_map(|(r, c)| {
                    let v = image.as_array()[[r, c]];
                    let rm = rms[[r, c]];
                    if v.is_finite() && rm.is_finite() && rm > 0.0 {
                        Some((c as f64 - col_min as f64, r as f64 - row_min as f64, v as f64, rm as f64))
                    } else {
                        None
                    }
                })
                .collect();

            let initial = GaussianParams {
                amp: input.peak_flux,
                xo: x - col_min as f64,
                yo: y - row_min as f64,
                sx: sx_px.max(0.5),
                sy: sx_px.max(0.5),
                theta: input.pa_deg.to_radians(),
            };

            let pos_free = matches!(stage, PriorizedStage::AmplitudePosition | PriorizedStage::Full);
            let shape_free = matches!(stage, PriorizedStage::Full);
            let bounds = [
                crate::fit::lm::ParamBound { lo: initial.amp.min(0.0) - initial.amp.abs(), hi: initial.amp.abs() * 4.0 + 1.0, fixed: false },
                crate::fit::lm::ParamBound { lo: initial.xo - 2.0, hi: initial.xo + 2.0, fixed: !pos_free },
                crate::fit::lm::ParamBound { lo: initial.yo - 2.0, hi: initial.yo + 2.0, fixed: !pos_free },
                crate::fit::lm::ParamBound { lo: initial.sx * 0.5, hi: initial.sx * 2.0, fixed: !shape_free },
                crate::fit::lm::ParamBound { lo: initial.sy * 0.5, hi: initial.sy * 2.0, fixed: !shape_free },
                crate::fit::lm::ParamBound { lo: -std::f64::consts::PI, hi: std::f64::consts::PI, fixed: !shape_free },
            ];

            let result = crate::fit::lm::fit_lm(&initial.to_array(), &bounds, &points);
            let mut model = GaussianParams::from_array([
                result.params[0], result.params[1], result.params[2],
                result.params[3], result.params[4], result.params[5],
            ]);
            if model.sx < model.sy {
                std::mem::swap(&mut model.sx, &mut model.sy);
                model.theta += std::f64::consts::FRAC_PI_2;
            }
            let pa_deg = pa_limit(model.theta.to_degrees());
            let full_x = col_min as f64 + model.xo;
            let full_y = row_min as f64 + model.yo;
            let (ra_deg, dec_deg) = self.wcs.pix_to_sky(full_x, full_y).unwrap_or((input.ra_deg, input.dec_deg));
            let ra_deg = ((ra_deg % 360.0) + 360.0) % 360.0;

            let major_fwhm_px = model.sx * SIGMA_TO_FWHM;
            let minor_fwhm_px = model.sy * SIGMA_TO_FWHM;
            let major_arcsec = self
                .wcs
                .pix_vector_to_sky(full_x, full_y, major_fwhm_px, model.theta.to_degrees())
                .map(|v| v.length_deg * 3600.0)
                .unwrap_or(major_fwhm_px);
            let minor_arcsec = self
                .wcs
                .pix_vector_to_sky(full_x, full_y, minor_fwhm_px, model.theta.to_degrees() + 90.0)
                .map(|v| v.length_deg * 3600.0)
                .unwrap_or(minor_fwhm_px);

            let beam_area_pix = self.beam_provider.pixel_beam().map(|b| {
                std::f64::consts::PI * b.major_px * b.minor_px / (4.0 * std::f64::consts::LN_2)
            });
            let int_flux = match beam_area_pix {
                Some(area) if area > 0.0 => {
                    model.amp * model.sx * model.sy * SIGMA_TO_FWHM.powi(2) * std::f64::consts::PI / area
                }
                _ => model.amp,
            };

            let clamped_row = (full_y.round().max(0.0) as usize).min(h.saturating_sub(1));
            let clamped_col = (full_x.round().max(0.0) as usize).min(w.saturating_sub(1));
            let background_px = background[[clamped_row, clamped_col]] as f64;
            let local_rms = rms[[clamped_row, clamped_col]] as f64;

            let beam_area_deg2 = self.beam_provider.beam_at(ra_deg, dec_deg).area_deg2();
            let condon = condon_errors(major_arcsec, minor_arcsec, pa_deg, model.amp, local_rms, int_flux, beam_area_deg2);

            let amp_fixed = bounds[0].fixed;
            let pos_fixed = bounds[1].fixed;
            let shape_fixed = bounds[3].fixed;

            results.push(FittedComponent {
                island: input.island,
                source: input.source,
                background: background_px,
                local_rms,
                ra_deg,
                err_ra_deg: if pos_fixed { -1.0 } else { condon.err_ra_deg },
                dec_deg,
                err_dec_deg: if pos_fixed { -1.0 } else { condon.err_dec_deg },
                peak_flux_jy_beam: model.amp,
                err_peak_flux_jy_beam: if amp_fixed { -1.0 } else { condon.err_peak_flux },
                int_flux_jy: int_flux,
                err_int_flux_jy: if amp_fixed || shape_fixed { -1.0 } else { condon.err_int_flux },
                major_arcsec,
                err_major_arcsec: if shape_fixed { -1.0 } else { condon.err_major_arcsec },
                minor_arcsec,
                err_minor_arcsec: if shape_fixed { -1.0 } else { condon.err_minor_arcsec },
                pa_deg,
                err_pa_deg: if shape_fixed { -1.0 } else { condon.err_pa_deg },
                flags: ComponentFlags::PRIORIZED,
                residual_mean: result.residual_mean,
                residual_std: result.residual_std,
            });
        }

        results
    }
}

fn great_circle_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (ra1, dec1) = (a.0.to_radians(), a.1.to_radians());
    let (ra2, dec2) = (b.0.to_radians(), b.1.to_radians());
    let d = (dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * (ra1 - ra2).cos()).clamp(-1.0, 1.0);
    d.acos().to_degrees()
}

/// One row of an external priorized/forced-measurement input catalog.
#[derive(Clone, Copy, Debug)]
pub struct PriorizedInput {
    pub island: u32,
    pub source: u32,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub major_arcsec: f64,
    pub minor_arcsec: f64,
    pub pa_deg: f64,
    pub peak_flux: f64,
}
