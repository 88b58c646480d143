//! Source-finding engine for radio-astronomy images.
//!
//! Callers provide a [`image::PixelImage`], a [`geometry::WcsProvider`], and
//! a [`geometry::BeamProvider`]; the [`orchestrator::Orchestrator`] drives
//! background estimation, island segmentation, summit extraction, and
//! constrained multi-Gaussian fitting, delivering [`catalog::CatalogEntry`]
//! rows to a caller-supplied [`orchestrator::CatalogSink`].

pub mod background;
pub mod catalog;
pub mod config;
pub mod consts;
pub mod curvature;
pub mod error;
pub mod errors_condon;
pub mod fft;
pub mod fit;
pub mod geometry;
pub mod image;
pub mod kernel;
pub mod orchestrator;
pub mod segment;
pub mod summit;

pub use catalog::{CatalogEntry, ComponentFlags, FittedComponent, IslandSummary};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use geometry::{Beam, BeamProvider, PixelBeam, WcsProvider};
pub use image::PixelImage;
pub use orchestrator::{CancellationToken, CatalogSink, Orchestrator, PriorizedInput};
