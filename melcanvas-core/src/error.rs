use thiserror::Error;

/// Errors produced by the transform, codec, phase and editor layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed transform or codec parameters.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Two arrays that must agree in shape do not.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Zero dynamic range (silent or constant input). Callers usually recover
    /// by emitting a constant output.
    #[error("degenerate signal: zero dynamic range")]
    DegenerateSignal,

    /// Exact phase recombination was requested but no phase store exists.
    #[error("no stored phase available for exact reconstruction")]
    MissingPhase,

    /// An edit request named an operation outside the supported set.
    #[error("unknown edit operation: {0}")]
    UnknownOperation(String),

    /// A persisted phase record could not be decoded.
    #[error("corrupt phase data: {0}")]
    CorruptPhaseData(String),

    /// realfft rejected a buffer.
    #[error("FFT failure: {0}")]
    Fft(String),
}

/// Convenience alias so callers can write `Result<T>` instead of `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
