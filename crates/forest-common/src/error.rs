//! Error types for rejected request parameters.

use thiserror::Error;

/// Result type alias using ParamError.
pub type ParamResult<T> = Result<T, ParamError>;

/// A request parameter that failed validation before any pipeline work began.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Tile {z}/{x}/{y} is outside the tile matrix")]
    TileOutOfRange { z: u32, x: u32, y: u32 },

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Invalid color '{0}'")]
    InvalidColor(String),

    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),
}

impl ParamError {
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        ParamError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn missing(param: impl Into<String>) -> Self {
        ParamError::MissingParameter(param.into())
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        400
    }
}

impl From<serde_json::Error> for ParamError {
    fn from(err: serde_json::Error) -> Self {
        ParamError::InvalidGeoJson(err.to_string())
    }
}
