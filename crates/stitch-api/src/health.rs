//! Liveness and aggregate counters.

use axum::{Json, extract::State};
use serde::Serialize;
use stitch_core::{
  ingest::Ingestor,
  store::{EventStore, StoreStats},
};

use crate::error::{ApiError, store_error};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
  status:  &'static str,
  service: &'static str,
  version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
  Json(HealthResponse {
    status:  "ok",
    service: "stitch",
    version: env!("CARGO_PKG_VERSION"),
  })
}

/// `GET /stats`
pub async fn stats<S>(State(ingestor): State<Ingestor<S>>) -> Result<Json<StoreStats>, ApiError>
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let stats = ingestor.store().stats().await.map_err(store_error)?;
  Ok(Json(stats))
}
