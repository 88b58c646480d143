use thiserror::Error;

/// The *only* publicly visible error from this crate.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Contradictory configuration flags or an out-of-range parameter.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No beam was supplied and none could be derived from the image metadata.
    #[error("no beam available: {0}")]
    MissingBeam(String),

    /// An auxiliary input (background, RMS, mask) has a shape that does not
    /// match the primary image.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A Stokes axis was present but not unitary.
    #[error("unsupported input: {0}")]
    NotSupported(String),

    /// The run was cancelled via the cooperative cancellation token.
    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
