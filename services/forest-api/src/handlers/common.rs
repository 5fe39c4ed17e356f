//! Response helpers shared by the handlers.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, warn};

use forest_pipeline::PipelineError;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub status: u16,
}

/// JSON error response with `status`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        message: message.into(),
        status: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

/// Response for a failed pipeline request.
///
/// A cancelled request gets an empty 499; nobody is listening for it.
pub fn pipeline_error(err: &PipelineError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if !err.is_reportable() {
        return status.into_response();
    }
    if status.is_server_error() {
        error!(error = %err, kind = err.kind(), "Request failed");
    } else {
        warn!(error = %err, kind = err.kind(), "Request rejected");
    }
    json_error(status, err.to_string())
}

/// Binary response with `content_type`.
pub fn binary_response(content_type: &'static str, body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// A cancellation token for one request's pipeline.
///
/// The returned guard cancels the token when dropped, so a handler future
/// dropped on client disconnect cancels the pipeline it started.
pub fn request_cancellation() -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forest_common::ParamError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::from(ParamError::missing("layer")), 400),
            (PipelineError::NoCoverage, 404),
            (
                PipelineError::AreaTooLarge {
                    pixels: 10,
                    limit: 5,
                },
                413,
            ),
            (PipelineError::IndexUnavailable("timeout".into()), 503),
            (PipelineError::RenderFailed("gdaldem".into()), 500),
            (PipelineError::ClientCancelled, 499),
        ];
        for (err, status) in cases {
            assert_eq!(pipeline_error(&err).status().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let (token, guard) = request_cancellation();
        assert!(!token.is_cancelled());
        drop(guard);
        assert!(token.is_cancelled());
    }
}
