//! Identity types: profiles, mapping edges and the stitching contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::property::Properties;

/// Provenance tag written on mapping edges created by `$identify` events.
pub const IDENTIFY_SOURCE: &str = "identify";

// ─── Identity ────────────────────────────────────────────────────────────────

/// Whether a distinct id has been tied to a canonical user yet.
///
/// The only legal transition is `Anonymous` → `Identified`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdentityState {
  Anonymous,
  Identified,
}

/// One row of the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
  pub id:           i64,
  pub distinct_id:  String,
  pub user_id:      Option<String>,
  /// The anonymous identifier this row started life under, kept after
  /// identification.
  pub anonymous_id: Option<String>,
  pub state:        IdentityState,
  /// Every device id ever seen for this identity, in first-seen order.
  pub device_ids:   Vec<String>,
  pub email:        Option<String>,
  pub first_name:   Option<String>,
  pub last_name:    Option<String>,
  pub properties:   Properties,
  pub first_seen:   DateTime<Utc>,
  pub last_seen:    DateTime<Utc>,
}

/// Profile attributes supplied by a `$set` update. `None` leaves the stored
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
  pub email:      Option<String>,
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
  /// Merged key by key into the stored properties.
  pub properties: Properties,
}

// ─── Mapping ledger ──────────────────────────────────────────────────────────

/// What kind of identifier a mapping edge points at.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MappingType {
  DeviceId,
}

/// An edge in the identity graph: `mapped_id` belongs to `canonical_user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEdge {
  pub id:                i64,
  pub canonical_user_id: String,
  pub mapped_id:         String,
  pub mapping_type:      MappingType,
  /// Always `1.0` for exact identifier matches.
  pub confidence_score:  f64,
  pub source:            String,
  /// Cumulative count of events re-attributed because of this edge.
  pub events_stitched:   u64,
  pub first_seen:        DateTime<Utc>,
  pub last_seen:         DateTime<Utc>,
}

/// Input to [`crate::store::EventStore::record_merge`].
#[derive(Debug, Clone)]
pub struct MergeRecord {
  pub canonical_user_id:     String,
  pub mapped_id:             String,
  pub mapping_type:          MappingType,
  pub source:                String,
  pub events_stitched_delta: u64,
}

// ─── Stitching ───────────────────────────────────────────────────────────────

/// A request to merge an anonymous identifier into a canonical user.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchRequest {
  pub anonymous_id: String,
  pub user_id:      String,
  /// The distinct id the identity row carries after promotion.
  pub distinct_id:  String,
  pub device_id:    Option<String>,
  pub source:       String,
}

impl StitchRequest {
  /// Convenience constructor: the promoted row takes `user_id` as its
  /// distinct id, no device id, `identify` provenance.
  pub fn new(anonymous_id: impl Into<String>, user_id: impl Into<String>) -> Self {
    let user_id = user_id.into();
    Self {
      anonymous_id: anonymous_id.into(),
      distinct_id: user_id.clone(),
      user_id,
      device_id: None,
      source: IDENTIFY_SOURCE.to_owned(),
    }
  }

  pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
    self.device_id = Some(device_id.into());
    self
  }

  pub fn with_distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
    self.distinct_id = distinct_id.into();
    self
  }
}

/// The observable result of one stitch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchOutcome {
  /// The identity row that now represents the user.
  pub identity_id:       i64,
  /// Events whose `user_id` was rewritten by this stitch.
  pub events_stitched:   u64,
  /// `true` when the anonymous id was previously mapped to another user.
  pub conflict_detected: bool,
  /// The canonical user the anonymous id pointed at before this stitch, if
  /// that differs from the new one.
  pub previous_user_id:  Option<String>,
}
