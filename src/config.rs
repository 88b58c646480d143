//! Engine configuration: a single value constructed once by the caller and
//! threaded by reference through every pipeline stage, mirroring the
//! teacher's `pipeline::config::PipelineConfig`.

use serde::{Deserialize, Serialize};

/// Which background/RMS estimator the orchestrator runs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BackgroundMethod {
    /// Two-pass FFT top-hat convolution (the default, full-fidelity estimator).
    Fft,
    /// Tile the image into `mesh_size`-beam squares and take the median/IQR
    /// of each tile. Cheaper, coarser; used when curvature detail is not
    /// needed downstream (e.g. priorized fitting).
    Tiled { mesh_size: f64 },
}

impl Default for BackgroundMethod {
    fn default() -> Self {
        BackgroundMethod::Fft
    }
}

/// Which parameters are free during priorized (forced-measurement) fitting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorizedStage {
    /// Only amplitude is refit; position and shape are held at input values.
    AmplitudeOnly,
    /// Amplitude and position are refit; shape is held.
    AmplitudePosition,
    /// Amplitude, position, and shape are all refit.
    Full,
}

impl PriorizedStage {
    /// Convert from the 1/2/3 convention used in the catalog-facing API.
    pub fn from_stage_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(PriorizedStage::AmplitudeOnly),
            2 => Some(PriorizedStage::AmplitudePosition),
            3 => Some(PriorizedStage::Full),
            _ => None,
        }
    }
}

fn default_seed_clip() -> f64 {
    crate::consts::DEFAULT_SEED_CLIP
}

fn default_flood_clip() -> f64 {
    crate::consts::DEFAULT_FLOOD_CLIP
}

fn default_mesh_size() -> f64 {
    crate::consts::DEFAULT_MESH_SIZE
}

fn default_step_size() -> i64 {
    crate::consts::DEFAULT_STEP_SIZE
}

fn default_box_size() -> i64 {
    crate::consts::DEFAULT_BOX_SIZE
}

fn default_background_method() -> BackgroundMethod {
    BackgroundMethod::default()
}

fn default_rng_seed() -> u64 {
    0x5EED_u64
}

/// All tunable parameters governing a single engine run.
///
/// Constructed once (typically deserialized from a caller's TOML/JSON config
/// file) and shared by reference through the orchestrator and every stage it
/// drives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SNR threshold a pixel must clear to seed an island (inner clip).
    #[serde(default = "default_seed_clip")]
    pub seed_clip: f64,

    /// SNR threshold a pixel must clear to be included in an island once
    /// seeded (outer clip).
    #[serde(default = "default_flood_clip")]
    pub flood_clip: f64,

    /// Tile size for [`BackgroundMethod::Tiled`], in beams.
    #[serde(default = "default_mesh_size")]
    pub mesh_size: f64,

    /// Pixels-per-beam stride used by the FFT background estimator's
    /// downsampling pass.
    #[serde(default = "default_step_size")]
    pub step_size: i64,

    /// Top-hat averaging kernel diameter, in beams.
    #[serde(default = "default_box_size")]
    pub box_size: i64,

    /// Which background/RMS estimator to run.
    #[serde(default = "default_background_method")]
    pub background_method: BackgroundMethod,

    /// Cap on the number of components fit per island. `None` means no cap.
    #[serde(default)]
    pub max_summits: Option<usize>,

    /// Telescope latitude in degrees, used to approximate the beam's sky
    /// projection when estimating summit widths. `None` disables the
    /// correction.
    #[serde(default)]
    pub telescope_latitude: Option<f64>,

    /// Which parameters are free in priorized (forced-measurement) mode.
    #[serde(default)]
    pub priorized_stage: PriorizedStage,

    /// Seed for the deterministic RNG used to fill masked pixels with
    /// synthetic noise during background pass 2.
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,

    /// Whether the orchestrator should also compute [`crate::catalog::IslandSummary`]
    /// aggregates alongside individual fitted components.
    #[serde(default)]
    pub compute_island_summaries: bool,
}

impl Default for PriorizedStage {
    fn default() -> Self {
        PriorizedStage::Full
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_clip: default_seed_clip(),
            flood_clip: default_flood_clip(),
            mesh_size: default_mesh_size(),
            step_size: default_step_size(),
            box_size: default_box_size(),
            background_method: default_background_method(),
            max_summits: None,
            telescope_latitude: None,
            priorized_stage: PriorizedStage::default(),
            rng_seed: default_rng_seed(),
            compute_island_summaries: false,
        }
    }
}

impl EngineConfig {
    /// Validate cross-field invariants that `serde` cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.seed_clip < self.flood_clip {
            return Err(crate::error::EngineError::Config(format!(
                "seed_clip ({}) must be >= flood_clip ({})",
                self.seed_clip, self.flood_clip
            )));
        }
        if self.flood_clip <= 0.0 {
            return Err(crate::error::EngineError::Config(
                "flood_clip must be positive".into(),
            ));
        }
        if self.step_size <= 0 || self.box_size <= 0 {
            return Err(crate::error::EngineError::Config(
                "step_size and box_size must be positive".into(),
            ));
        }
        if let BackgroundMethod::Tiled { mesh_size } = self.background_method {
            if mesh_size <= 0.0 {
                return Err(crate::error::EngineError::Config(
                    "mesh_size must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn seed_below_flood_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.seed_clip = 2.0;
        cfg.flood_clip = 4.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"seed_clip": 6.0}"#).unwrap();
        assert_eq!(cfg.seed_clip, 6.0);
        assert_eq!(cfg.flood_clip, crate::consts::DEFAULT_FLOOD_CLIP);
    }
}
