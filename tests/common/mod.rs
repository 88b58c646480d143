//! Shared fixtures for the integration tests: synthetic Gaussian images and
//! minimal flat-sky `WcsProvider`/`BeamProvider` stand-ins.

use std::sync::Mutex;

use ndarray::Array2;
use srcfind_core::{Beam, BeamProvider, CatalogEntry, CatalogSink, PixelBeam, Result, WcsProvider};

/// Degrees per pixel used by [`FlatWcs`] in every test fixture.
pub const PIXEL_SCALE_DEG: f64 = 1.0 / 3600.0;

/// A flat-sky tangent-plane approximation: good enough over the small test
/// image footprints used here, where curvature is negligible.
pub struct FlatWcs {
    pub ra0_deg: f64,
    pub dec0_deg: f64,
    pub scale_deg: f64,
}

impl Default for FlatWcs {
    fn default() -> Self {
        Self {
            ra0_deg: 180.0,
            dec0_deg: 0.0,
            scale_deg: PIXEL_SCALE_DEG,
        }
    }
}

impl WcsProvider for FlatWcs {
    fn pix_to_sky(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        Some((self.ra0_deg + x * self.scale_deg, self.dec0_deg + y * self.scale_deg))
    }

    fn sky_to_pix(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)> {
        Some((
            (ra_deg - self.ra0_deg) / self.scale_deg,
            (dec_deg - self.dec0_deg) / self.scale_deg,
        ))
    }

    fn pix_vector_to_sky(&self, x: f64, y: f64, r_pix: f64, theta_deg: f64) -> Option<srcfind_core::geometry::SkyVector> {
        let (ra0, dec0) = self.pix_to_sky(x, y)?;
        let theta = theta_deg.to_radians();
        let (ra1, dec1) = self.pix_to_sky(x + r_pix * theta.cos(), y + r_pix * theta.sin())?;
        let length_deg = ((ra1 - ra0).powi(2) + (dec1 - dec0).powi(2)).sqrt();
        Some(srcfind_core::geometry::SkyVector {
            ra_deg: ra1,
            dec_deg: dec1,
            length_deg,
            pa_deg: theta_deg,
        })
    }
}

/// A beam that does not vary across the field of view.
pub struct FlatBeam {
    pub pixel_beam: PixelBeam,
    pub scale_deg: f64,
}

impl FlatBeam {
    pub fn new(major_px: f64, minor_px: f64, pa_deg: f64) -> Self {
        Self {
            pixel_beam: PixelBeam::new(major_px, minor_px, pa_deg),
            scale_deg: PIXEL_SCALE_DEG,
        }
    }
}

impl BeamProvider for FlatBeam {
    fn beam_at(&self, _ra_deg: f64, _dec_deg: f64) -> Beam {
        Beam::new(
            self.pixel_beam.major_px * self.scale_deg,
            self.pixel_beam.minor_px * self.scale_deg,
            self.pixel_beam.pa_deg,
        )
    }

    fn pixel_beam(&self) -> Option<PixelBeam> {
        Some(self.pixel_beam)
    }

    fn pixel_scale_deg(&self) -> Option<(f64, f64)> {
        Some((self.scale_deg, self.scale_deg))
    }
}

/// Collects every [`CatalogEntry`] handed to it, in arrival order.
#[derive(Default)]
pub struct VecSink {
    pub entries: Mutex<Vec<CatalogEntry>>,
}

impl CatalogSink for VecSink {
    fn send(&self, entry: CatalogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

impl VecSink {
    pub fn components(&self) -> Vec<srcfind_core::FittedComponent> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CatalogEntry::Component(c) => Some(c.clone()),
                CatalogEntry::IslandSummary(_) => None,
            })
            .collect()
    }
}

/// A deterministic pseudo-random noise field, fixed per call via a simple
/// linear congruential generator (no dependency on `rand` needed for fixture
/// generation, which doesn't need to be cryptographically anything, just
/// reproducible without consuming the crate's seeded RNG).
pub fn noise_field(h: usize, w: usize, sigma: f32, seed: u64) -> Array2<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f64 / u32::MAX as f64) as f32
    };
    Array2::from_shape_fn((h, w), |_| {
        let u1 = next().max(1e-6);
        let u2 = next();
        sigma * (-2.0 * (u1 as f64).ln()).sqrt() as f32 * (std::f64::consts::TAU * u2 as f64).cos() as f32
    })
}

/// Evaluate an elliptical Gaussian over a full image grid and add it to
/// `data` in place.
pub fn add_gaussian(data: &mut Array2<f32>, amp: f32, xo: f32, yo: f32, sx: f32, sy: f32, theta_rad: f32) {
    let (h, w) = data.dim();
    let (sint, cost) = theta_rad.sin_cos();
    for r in 0..h {
        for c in 0..w {
            let dx = c as f32 - xo;
            let dy = r as f32 - yo;
            let a = (dx * cost + dy * sint) / sx;
            let b = (dx * sint - dy * cost) / sy;
            data[[r, c]] += amp * (-0.5 * (a * a + b * b)).exp();
        }
    }
}
