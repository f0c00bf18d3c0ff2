use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use botdash_core::errors::Error;

/// A core [`Error`] on its way out of a handler.
///
/// Client errors carry their own message. Server errors are answered with the
/// handler-supplied context so internals stay in the log.
#[derive(Debug)]
pub struct ApiError {
    err: Error,
    context: &'static str,
}

impl ApiError {
    pub fn with_context(err: Error, context: &'static str) -> Self {
        Self { err, context }
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.err)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::with_context(err, "request failed")
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Unauthenticated => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::Validation(_) | Error::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        Error::Upstream(_)
        | Error::Persistence(_)
        | Error::Io(_)
        | Error::Json(_)
        | Error::External(_)
        | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.err.is_client_error() {
            tracing::info!(status = status.as_u16(), "{}", self.err);
            self.err.to_string()
        } else {
            tracing::error!(status = status.as_u16(), "{}: {}", self.context, self.err);
            self.context.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_status() {
        assert_eq!(status_for(&Error::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&Error::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&Error::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::Upstream("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&Error::Persistence("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let resp = ApiError::with_context(
            Error::Persistence("/srv/secret/path: EACCES".into()),
            "failed to save guild config",
        )
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
