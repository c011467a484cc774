//! Read-only views of the identity graph.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities/{distinct_id}` | 404 if unknown |
//! | `GET`  | `/identities/{distinct_id}/events` | Oldest first |
//! | `GET`  | `/mappings/{mapped_id}` | Latest first |

use axum::{
  Json,
  extract::{Path, State},
};
use stitch_core::{
  event::Event,
  identity::{Identity, MappingEdge},
  ingest::Ingestor,
  store::EventStore,
};

use crate::error::{ApiError, store_error};

/// `GET /identities/{distinct_id}`
pub async fn get_one<S>(
  State(ingestor): State<Ingestor<S>>,
  Path(distinct_id): Path<String>,
) -> Result<Json<Identity>, ApiError>
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  ingestor
    .store()
    .find_identity(distinct_id.clone())
    .await
    .map_err(store_error)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("identity {distinct_id}")))
}

/// `GET /identities/{distinct_id}/events`
pub async fn events<S>(
  State(ingestor): State<Ingestor<S>>,
  Path(distinct_id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError>
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let events = ingestor
    .store()
    .events_for(distinct_id)
    .await
    .map_err(store_error)?;
  Ok(Json(events))
}

/// `GET /mappings/{mapped_id}`
pub async fn mappings<S>(
  State(ingestor): State<Ingestor<S>>,
  Path(mapped_id): Path<String>,
) -> Result<Json<Vec<MappingEdge>>, ApiError>
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let edges = ingestor
    .store()
    .mappings_for(mapped_id)
    .await
    .map_err(store_error)?;
  Ok(Json(edges))
}
