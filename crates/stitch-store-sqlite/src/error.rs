//! Error type for `stitch-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The connection thread is gone or a call could not be dispatched.
  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {kind} value in database: {value:?}")]
  UnknownValue {
    kind:  &'static str,
    value: String,
  },

  /// Stored data or a write contradicts an invariant the store maintains.
  #[error("invariant violation: {0}")]
  InvariantViolation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised inside a connection closure travel back boxed in
/// [`tokio_rusqlite::Error::Other`]; unwrap them to keep their variant.
impl From<tokio_rusqlite::Error> for Error {
  fn from(err: tokio_rusqlite::Error) -> Self {
    match err {
      tokio_rusqlite::Error::Rusqlite(e) => Error::Sqlite(e),
      tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
        Ok(own) => *own,
        Err(other) => Error::Database(tokio_rusqlite::Error::Other(other)),
      },
      other => Error::Database(other),
    }
  }
}

impl From<Error> for tokio_rusqlite::Error {
  fn from(err: Error) -> Self { tokio_rusqlite::Error::Other(Box::new(err)) }
}

/// Map store failures onto the core taxonomy: corrupt or contradictory data
/// is an invariant violation, everything else is transient.
impl From<Error> for stitch_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::InvariantViolation(msg) => stitch_core::Error::InvariantViolation(msg),
      e @ (Error::Json(_) | Error::DateParse(_) | Error::UnknownValue { .. }) => {
        stitch_core::Error::InvariantViolation(e.to_string())
      }
      e @ (Error::Database(_) | Error::Sqlite(_)) => {
        stitch_core::Error::Transient(Box::new(e))
      }
    }
  }
}
