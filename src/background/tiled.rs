//! Tile-based background/RMS estimator (`BackgroundMethod::Tiled`): cheaper
//! and coarser than the FFT estimator, used when curvature detail is not
//! needed downstream (e.g. priorized fitting).

use ndarray::Array2;
use tracing::info;

use crate::config::EngineConfig;
use crate::consts::IQR_TO_SIGMA;
use crate::error::{EngineError, Result};
use crate::geometry::PixelBeam;
use crate::image::PixelImage;

use super::BackgroundMaps;

/// Partitions the image into `mesh_size`-beam tiles; each tile's background
/// is the tile's median and its RMS is `IQR / 1.34896`.
pub fn estimate(
    image: &PixelImage,
    pixel_beam: Option<PixelBeam>,
    mesh_size: f64,
    _config: &EngineConfig,
) -> Result<BackgroundMaps> {
    let beam = pixel_beam.ok_or_else(|| {
        EngineError::MissingBeam("tiled background estimator requires a pixel beam".into())
    })?;

    let tile_px = (beam.major_px.max(beam.minor_px) * mesh_size).round().max(1.0) as usize;
    let (h, w) = image.shape();
    info!(tile_px, height = h, width = w, "running tiled background estimator");

    let mut background = Array2::<f32>::from_elem((h, w), f32::NAN);
    let mut rms = Array2::<f32>::from_elem((h, w), f32::NAN);

    let mut row = 0;
    while row < h {
        let row_end = (row + tile_px).min(h);
        let mut col = 0;
        while col < w {
            let col_end = (col + tile_px).min(w);
            let tile = image.as_array().slice(ndarray::s![row..row_end, col..col_end]);
            let mut values: Vec<f64> = tile.iter().filter(|v| v.is_finite()).map(|&v| v as f64).collect();
            if !values.is_empty() {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = percentile(&values, 0.5);
                let q1 = percentile(&values, 0.25);
                let q3 = percentile(&values, 0.75);
                let tile_rms = ((q3 - q1) / IQR_TO_SIGMA) as f32;
                for r in row..row_end {
                    for c in col..col_end {
                        if image.as_array()[[r, c]].is_finite() {
                            background[[r, c]] = median as f32;
                            rms[[r, c]] = tile_rms;
                        }
                    }
                }
            }
            col = col_end;
        }
        row = row_end;
    }

    Ok(BackgroundMaps { background, rms })
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
    fn flat_image_background_equals_value() {
        let data = Array2::<f32>::from_elem((40, 40), 3.0);
        let image = PixelImage::new(data);
        let cfg = EngineConfig::default();
        let beam = PixelBeam::new(2.0, 2.0, 0.0);
        let maps = estimate(&image, Some(beam), 5.0, &cfg).unwrap();
        for v in maps.background.iter() {
            assert!((v - 3.0).abs() < 1e-6);
        }
        for v in maps.rms.iter() {
            assert!(*v < 1e-6);
        }
    }

    #[test]
    fn missing_beam_errors() {
        let data = Array2::<f32>::zeros((10, 10));
        let image = PixelImage::new(data);
        let cfg = EngineConfig::default();
        assert!(estimate(&image, None, 5.0, &cfg).is_err());
    }
}
