//! Ingest endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/track`, `/engage` | `?data=<base64 JSON>` |
//! | `POST` | `/track`, `/engage` | Form body `data=<base64 JSON>` |
//!
//! The `x-device-id` request header is a device hint; the response echoes the
//! device id that was actually used.

use axum::{
  Json,
  extract::{Form, Query, State, rejection::{FormRejection, QueryRejection}},
  http::{HeaderMap, HeaderValue},
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use stitch_core::{
  ingest::{IngestResult, Ingestor, RecordId},
  store::EventStore,
};

use crate::error::ApiError;

pub const DEVICE_ID_HEADER: &str = "x-device-id";

#[derive(Debug, Deserialize)]
pub struct TrackParams {
  pub data: Option<String>,
}

/// Success body.
#[derive(Debug, Serialize)]
pub struct TrackResponse {
  pub status:            u8,
  pub record_id:         i64,
  pub record_kind:       &'static str,
  pub device_id:         String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub events_stitched:   Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub conflict_detected: Option<bool>,
}

impl From<IngestResult> for TrackResponse {
  fn from(result: IngestResult) -> Self {
    let (record_kind, record_id) = match result.record_id {
      RecordId::Event(id) => ("event", id),
      RecordId::Identity(id) => ("identity", id),
    };
    Self {
      status: 1,
      record_id,
      record_kind,
      device_id: result.resolved_device_id,
      events_stitched: result.stitch.as_ref().map(|s| s.events_stitched),
      conflict_detected: result.stitch.as_ref().map(|s| s.conflict_detected),
    }
  }
}

/// `GET /track?data=…`
pub async fn get<S>(
  State(ingestor): State<Ingestor<S>>,
  headers: HeaderMap,
  params: Result<Query<TrackParams>, QueryRejection>,
) -> Response
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let data = params
    .map_err(|e| ApiError::BadRequest(e.body_text()))
    .map(|Query(p)| p.data);
  handle(&ingestor, &headers, data).await
}

/// `POST /track` with a form body.
pub async fn post<S>(
  State(ingestor): State<Ingestor<S>>,
  headers: HeaderMap,
  params: Result<Form<TrackParams>, FormRejection>,
) -> Response
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let data = params
    .map_err(|e| ApiError::BadRequest(e.body_text()))
    .map(|Form(p)| p.data);
  handle(&ingestor, &headers, data).await
}

async fn handle<S>(
  ingestor: &Ingestor<S>,
  headers: &HeaderMap,
  data: Result<Option<String>, ApiError>,
) -> Response
where
  S: EventStore + 'static,
  stitch_core::Error: From<S::Error>,
{
  let hint = headers
    .get(DEVICE_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::to_owned);

  let result = match data {
    Ok(Some(data)) => ingestor
      .ingest(&data, hint.as_deref())
      .await
      .map_err(ApiError::from),
    Ok(None) => Err(ApiError::BadRequest("missing `data` parameter".to_owned())),
    Err(e) => Err(e),
  };

  match result {
    Ok(result) => {
      let device_id = result.resolved_device_id.clone();
      let mut response = Json(TrackResponse::from(result)).into_response();
      set_device_header(&mut response, &device_id);
      response
    }
    Err(err) => {
      if let ApiError::BadRequest(msg) = &err {
        tracing::debug!(error = %msg, "rejected ingest request");
      }
      let mut response = err.into_response();
      if let Some(hint) = hint {
        set_device_header(&mut response, &hint);
      }
      response
    }
  }
}

fn set_device_header(response: &mut Response, device_id: &str) {
  if let Ok(value) = HeaderValue::from_str(device_id) {
    response.headers_mut().insert(DEVICE_ID_HEADER, value);
  }
}
