//! Error taxonomy for the cube engine.

use thiserror::Error;

/// The error type returned by this crate.
///
/// Boundary-facing code (the HTTP server) matches on the
/// variant to choose a status code; internal glue code
/// propagates arbitrary context through [`Error::Other`].
#[derive(Error, Debug)]
pub enum Error {
    /// Bad expression, missing expressions, a band/expression
    /// count mismatch, or an unknown `cube_type` tag.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An unknown cube id, chunk id, or missing file.
    #[error("not found: {0}")]
    NotFound(String),

    /// A file already exists with a different size.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cannot open a source raster, or a warp failed.
    #[error("io error: {0}")]
    Io(String),

    /// A download of a chunk that was never requested.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Catch-all for glue errors bubbling up from the raster
    /// backend or other internal context chains.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfiguration(e.to_string())
    }
}

/// The `Result` type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;
