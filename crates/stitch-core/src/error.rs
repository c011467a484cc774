//! Error types for `stitch-core`.
//!
//! The taxonomy distinguishes bad input (never retried, nothing mutated) from
//! store failures (whole transaction rolled back, safe to retry) and from
//! broken invariants (rolled back, logged loudly).

use thiserror::Error;

/// A malformed or incomplete inbound payload.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("payload is not valid base64: {0}")]
  Encoding(String),

  #[error("payload is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("payload must be a JSON object")]
  NotAnObject,

  #[error("missing required field {0:?}")]
  MissingField(&'static str),

  #[error("field {field:?} has the wrong type: expected {expected}")]
  WrongType {
    field:    &'static str,
    expected: &'static str,
  },

  #[error("invalid event time: {0}")]
  InvalidTime(String),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(#[from] ValidationError),

  /// The durable store could not complete the transaction. The caller may
  /// retry.
  #[error("store unavailable: {0}")]
  Transient(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invariant violation: {0}")]
  InvariantViolation(String),
}

impl Error {
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Transient(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
