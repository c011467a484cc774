//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
///
/// Every variant renders as `{"status": 0, "error": <code>, "message": …}` so
/// SDKs can branch on `status` without parsing the HTTP status line.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The store could not complete the request; retrying is safe.
  #[error("try again: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ApiError {
  fn code(&self) -> &'static str {
    match self {
      ApiError::NotFound(_) => "not_found",
      ApiError::BadRequest(_) => "bad_request",
      ApiError::Unavailable(_) => "try_again",
      ApiError::Internal(_) => "internal",
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<stitch_core::Error> for ApiError {
  fn from(err: stitch_core::Error) -> Self {
    match err {
      stitch_core::Error::Validation(e) => ApiError::BadRequest(e.to_string()),
      e @ stitch_core::Error::Transient(_) => ApiError::Unavailable(e.to_string()),
      // Details of a broken invariant stay in the server log.
      stitch_core::Error::InvariantViolation(_) => {
        ApiError::Internal("the request could not be processed".to_owned())
      }
    }
  }
}

/// Lift a backend error through the core taxonomy.
pub(crate) fn store_error<E>(err: E) -> ApiError
where
  stitch_core::Error: From<E>,
{
  let err = stitch_core::Error::from(err);
  if let stitch_core::Error::InvariantViolation(msg) = &err {
    tracing::error!(error = %msg, "invariant violated while reading");
  }
  ApiError::from(err)
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = json!({
      "status":  0,
      "error":   self.code(),
      "message": match &self {
        ApiError::NotFound(m)
        | ApiError::BadRequest(m)
        | ApiError::Unavailable(m)
        | ApiError::Internal(m) => m,
      },
    });
    (self.status(), Json(body)).into_response()
  }
}
