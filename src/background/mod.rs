//! Background and RMS estimation.

pub mod fft_estimator;
pub mod tiled;

use ndarray::Array2;

use crate::config::{BackgroundMethod, EngineConfig};
use crate::error::Result;
use crate::geometry::PixelBeam;
use crate::image::PixelImage;

/// Local background (mean) and RMS maps, same shape as the source image.
/// NaN mirrors the source image's mask.
#[derive(Clone, Debug)]
pub struct BackgroundMaps {
    pub background: Array2<f32>,
    pub rms: Array2<f32>,
}

/// Dispatches to the estimator named by `config.background_method`.
pub fn estimate(image: &PixelImage, pixel_beam: Option<PixelBeam>, config: &EngineConfig) -> Result<BackgroundMaps> {
    match config.background_method {
        BackgroundMethod::Fft => fft_estimator::estimate(image, pixel_beam, config),
        BackgroundMethod::Tiled { mesh_size } => tiled::estimate(image, pixel_beam, mesh_size, config),
    }
}
