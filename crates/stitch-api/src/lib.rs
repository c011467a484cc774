//! HTTP API for the identity-stitching event pipeline.
//!
//! Exposes an axum [`Router`] backed by any [`stitch_core::store::EventStore`].
//! TLS, cookies and other transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = stitch_api::api_router(Arc::new(store));
//! ```

pub mod error;
pub mod health;
pub mod identities;
pub mod track;

use std::sync::Arc;

use axum::{Router, routing::get};
use stitch_core::{ingest::Ingestor, store::EventStore};

pub use error::ApiError;
pub use track::DEVICE_ID_HEADER;

/// Build the API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  Router::new()
    // Ingest
    .route("/track", get(track::get::<S>).post(track::post::<S>))
    .route("/engage", get(track::get::<S>).post(track::post::<S>))
    // Introspection
    .route("/health", get(health::health))
    .route("/stats", get(health::stats::<S>))
    .route("/identities/{distinct_id}", get(identities::get_one::<S>))
    .route("/identities/{distinct_id}/events", get(identities::events::<S>))
    .route("/mappings/{mapped_id}", get(identities::mappings::<S>))
    .with_state(Ingestor::new(store))
}
