//! Error types for the surface library.

use thiserror::Error;

/// Errors that can occur while routing or answering a surface query.
#[derive(Error, Debug)]
pub enum SurfaceError {
    /// Missing, malformed or out-of-range request input.
    #[error("{message}")]
    Validation { message: String },

    /// Unknown layer id, resource or operation.
    #[error("{message}")]
    NotFound { message: String },

    /// The operation's capability is not enabled for this instance.
    #[error("Operation '{operation}' is not allowed: capability '{capability}' is not enabled")]
    Forbidden {
        operation: String,
        capability: String,
    },

    /// A point or geometry has no valid elevation, or falls outside the surface.
    #[error("{message}")]
    SurfaceDomain { message: String },

    /// A grid request asks for more values than the configured cap.
    #[error("Requesting too much data ({requested} values, limit is {limit}); please reduce the number of rows and columns")]
    RequestTooLarge { requested: u64, limit: u64 },

    /// No transformation is known between the requested spatial references.
    #[error("Unsupported spatial reference: wkid {wkid}")]
    UnsupportedSpatialReference { wkid: u32 },

    /// Startup configuration is missing or invalid.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Failure reported by a raster, terrain or geometry engine.
    #[error("Surface engine failure: {message}")]
    Provider { message: String },

    /// IO error when reading elevation files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File size doesn't match SRTM1 or SRTM3 format.
    #[error("Invalid file size: {size} bytes (expected 25934402 for SRTM1 or 2884802 for SRTM3)")]
    InvalidFileSize { size: usize },
}

impl SurfaceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::SurfaceDomain {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// HTTP-style status code carried in the error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::UnsupportedSpatialReference { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::RequestTooLarge { .. } => 413,
            Self::SurfaceDomain { .. } => 422,
            Self::Config { .. }
            | Self::Provider { .. }
            | Self::Io(_)
            | Self::InvalidFileSize { .. } => 500,
        }
    }
}

/// Result type alias using [`SurfaceError`].
pub type Result<T> = std::result::Result<T, SurfaceError>;
