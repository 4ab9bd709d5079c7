//! Error types for hydroshed

use thiserror::Error;

/// Main error type for hydroshed operations.
///
/// Every delineation failure is terminal for the request that produced it;
/// only [`Error::Io`] is retried (with bounded backoff) before being surfaced.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid CRS descriptor: {0}")]
    InvalidCrs(String),

    #[error("no transformation path from {from} to {to}: {reason}")]
    TransformUndefined {
        from: String,
        to: String,
        reason: String,
    },

    #[error("point ({x}, {y}) is off the raster extent")]
    OffRaster { x: f64, y: f64 },

    #[error("no stream found within {max_steps} downslope steps of ({x}, {y})")]
    StreamNotFound { x: f64, y: f64, max_steps: usize },

    #[error("watershed exceeded the configured cap of {max_cells} cells")]
    WatershedTooLarge { max_cells: usize },

    #[error("watershed mask contains no cells")]
    EmptyMask,

    #[error("raster read failed: {0}")]
    Io(String),

    #[error("raster mismatch: {0}")]
    RasterMismatch(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type alias for hydroshed operations
pub type Result<T> = std::result::Result<T, Error>;
