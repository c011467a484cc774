//! Per-request ingestion: decode, validate, classify, then hand one
//! [`IngestCommand`] to the store to execute as a single transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::ValidationError,
  event::CanonicalEvent,
  identity::{IDENTIFY_SOURCE, ProfileFields, StitchOutcome, StitchRequest},
  normalize::normalize,
  payload::{self, Payload},
  property::PropertyValue,
  store::EventStore,
};

/// Event name that marks an identify operation.
pub const IDENTIFY_EVENT: &str = "$identify";

// ─── Commands ────────────────────────────────────────────────────────────────

/// A validated request, ready for the store to execute atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestCommand {
  /// A plain event: ensure the identity exists, then persist the event.
  Track {
    event:     CanonicalEvent,
    /// The client-supplied device id; `None` when only a placeholder exists.
    device_id: Option<String>,
  },
  /// An identify event: stitch, then persist the event under the user.
  Identify {
    event:  CanonicalEvent,
    stitch: StitchRequest,
  },
  /// A `$set` profile update.
  Profile {
    distinct_id: String,
    fields:      ProfileFields,
  },
}

/// The record a command created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecordId {
  Event(i64),
  Identity(i64),
}

/// What the store reports after executing an [`IngestCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
  pub record_id: RecordId,
  /// Present for identify commands only.
  pub stitch:    Option<StitchOutcome>,
}

/// The result of one ingest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
  pub record_id:          RecordId,
  /// The device id used for this request; the caller may persist it so the
  /// next request can send it back as a hint.
  pub resolved_device_id: String,
  pub stitch:             Option<StitchOutcome>,
}

// ─── Planning ────────────────────────────────────────────────────────────────

/// Classify a decoded payload into a command and resolve its device id.
///
/// Device id precedence: `$device_id` property, then `device_hint`, then a
/// fresh request-scoped placeholder. The placeholder is only reported back to
/// the caller; it never reaches the command, so nothing is persisted under it.
pub fn plan(
  payload: Payload,
  device_hint: Option<&str>,
) -> Result<(IngestCommand, String), ValidationError> {
  let hint = device_hint.map(str::trim).filter(|h| !h.is_empty());

  match payload {
    Payload::Profile(update) => {
      let device_id = hint.map_or_else(placeholder_device_id, str::to_owned);
      let command = IngestCommand::Profile {
        distinct_id: update.distinct_id,
        fields:      update.fields,
      };
      Ok((command, device_id))
    }
    Payload::Event(raw) => {
      let identifier = |key: &str| raw.properties.get(key).and_then(PropertyValue::as_identifier);

      let supplied = identifier("$device_id").or_else(|| hint.map(str::to_owned));
      let device_id = supplied.clone().unwrap_or_else(placeholder_device_id);

      let is_identify = raw.event.as_deref().map(str::trim) == Some(IDENTIFY_EVENT);
      let anonymous_id = identifier("$anon_distinct_id");
      let user_id = identifier("$user_id").or_else(|| identifier("$identified_id"));

      let event = normalize(&raw)?;

      if !is_identify {
        let command = IngestCommand::Track { event, device_id: supplied };
        return Ok((command, device_id));
      }

      let anonymous_id =
        anonymous_id.ok_or(ValidationError::MissingField("$anon_distinct_id"))?;
      let user_id = user_id.unwrap_or_else(|| event.distinct_id.clone());

      let stitch = StitchRequest {
        anonymous_id,
        user_id,
        distinct_id: event.distinct_id.clone(),
        device_id: supplied,
        source: IDENTIFY_SOURCE.to_owned(),
      };
      Ok((IngestCommand::Identify { event, stitch }, device_id))
    }
  }
}

fn placeholder_device_id() -> String { Uuid::new_v4().to_string() }

// ─── Ingestor ────────────────────────────────────────────────────────────────

/// Runs the ingest pipeline against a store.
///
/// Holds nothing but the store handle, so it is cheap to share between
/// concurrent requests.
pub struct Ingestor<S> {
  store: Arc<S>,
}

impl<S> Clone for Ingestor<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S> Ingestor<S>
where
  S: EventStore,
  Error: From<S::Error>,
{
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Ingest one base64-encoded payload.
  ///
  /// Validation failures are returned before the store is touched. Store
  /// failures leave no partial state behind and are never retried here.
  pub async fn ingest(
    &self,
    encoded: &str,
    device_hint: Option<&str>,
  ) -> Result<IngestResult> {
    let payload = payload::decode(encoded)?;
    let (command, resolved_device_id) = plan(payload, device_hint)?;

    match &command {
      IngestCommand::Track { event, .. } | IngestCommand::Identify { event, .. } => {
        tracing::debug!(
          event = %event.event_name,
          distinct_id = %event.distinct_id,
          category = %event.category,
          platform = %event.platform,
          "ingesting event"
        );
      }
      IngestCommand::Profile { distinct_id, .. } => {
        tracing::debug!(%distinct_id, "ingesting profile update");
      }
    }

    let stitch_ids = match &command {
      IngestCommand::Identify { stitch, .. } => {
        Some((stitch.anonymous_id.clone(), stitch.user_id.clone()))
      }
      _ => None,
    };

    let applied = match self.store.apply(command).await.map_err(Error::from) {
      Ok(applied) => applied,
      Err(err) => {
        match &err {
          Error::InvariantViolation(msg) => {
            tracing::error!(error = %msg, "invariant violated; request rolled back");
          }
          other => tracing::warn!(error = %other, "ingest failed; request rolled back"),
        }
        return Err(err);
      }
    };

    if let (Some(outcome), Some((anonymous_id, user_id))) = (&applied.stitch, &stitch_ids) {
      if outcome.conflict_detected {
        tracing::warn!(
          %anonymous_id,
          %user_id,
          previous_user_id = outcome.previous_user_id.as_deref().unwrap_or_default(),
          "identity conflict: anonymous id re-pointed to a new canonical user"
        );
      }
      tracing::info!(
        %anonymous_id,
        %user_id,
        identity_id = outcome.identity_id,
        events_stitched = outcome.events_stitched,
        "identity stitched"
      );
    }

    Ok(IngestResult {
      record_id: applied.record_id,
      resolved_device_id,
      stitch: applied.stitch,
    })
  }
}
