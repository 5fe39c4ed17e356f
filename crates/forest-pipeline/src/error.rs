//! Error taxonomy for the tile and analysis pipelines.

use thiserror::Error;

use crate::executor::ExecError;
use forest_common::ParamError;

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure of one request's pipeline.
///
/// Every variant except `IndexUnavailable` is terminal for the request.
/// `ClientCancelled` is not reported to anyone; the client is gone.
#[derive(Debug, Error)]
pub enum PipelineError {
    // === Request Errors ===
    #[error(transparent)]
    InvalidParameter(#[from] ParamError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Analysis area too large: {pixels} pixels exceeds limit of {limit}")]
    AreaTooLarge { pixels: u64, limit: u64 },

    // === Source Data Errors ===
    #[error("Tile index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("No source tiles intersect the requested area")]
    NoCoverage,

    // === Toolchain Errors ===
    #[error("Mosaic build failed for {layer}: {reason}")]
    MosaicBuildFailed { layer: String, reason: String },

    #[error("Warp failed for {layer}: {reason}")]
    WarpFailed { layer: String, reason: String },

    #[error("Band algebra failed: {0}")]
    AlgebraFailed(String),

    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    #[error("Statistics failed: {0}")]
    StatisticsFailed(String),

    // === Infrastructure Errors ===
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Workspace cleanup failed: {0}")]
    WorkspaceCleanupFailed(String),

    #[error("Request cancelled by client")]
    ClientCancelled,
}

impl PipelineError {
    /// Map an executor failure into the stage's error class.
    ///
    /// Cancellation is the same outcome whichever stage observed it.
    pub fn from_exec(err: ExecError, stage: impl FnOnce(String) -> PipelineError) -> Self {
        match err {
            ExecError::Cancelled { .. } => PipelineError::ClientCancelled,
            other => stage(other.to_string()),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidParameter(_) | PipelineError::InvalidRequest(_) => 400,
            PipelineError::NoCoverage => 404,
            PipelineError::AreaTooLarge { .. } => 413,
            PipelineError::ClientCancelled => 499,
            PipelineError::IndexUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Whether the caller may retry the whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::IndexUnavailable(_))
    }

    /// Whether the error should reach logs and the client.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, PipelineError::ClientCancelled)
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidParameter(_) => "invalid_parameter",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::AreaTooLarge { .. } => "area_too_large",
            PipelineError::IndexUnavailable(_) => "index_unavailable",
            PipelineError::NoCoverage => "no_coverage",
            PipelineError::MosaicBuildFailed { .. } => "mosaic_build_failed",
            PipelineError::WarpFailed { .. } => "warp_failed",
            PipelineError::AlgebraFailed(_) => "algebra_failed",
            PipelineError::RenderFailed(_) => "render_failed",
            PipelineError::StatisticsFailed(_) => "statistics_failed",
            PipelineError::Workspace(_) => "workspace",
            PipelineError::WorkspaceCleanupFailed(_) => "workspace_cleanup_failed",
            PipelineError::ClientCancelled => "cancelled",
        }
    }
}
