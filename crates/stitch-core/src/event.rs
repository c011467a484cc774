//! Event types: the append-only facts this system ingests.
//!
//! An event is never updated after it is written, with one exception: its
//! `user_id` may be rewritten by identity stitching once the anonymous
//! identifier it was captured under is merged into a canonical user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::property::Properties;

// ─── Classification ──────────────────────────────────────────────────────────

/// Coarse category derived from the event name.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventCategory {
  Fitness,
  Ecommerce,
  Navigation,
  Error,
  UserLifecycle,
  #[default]
  General,
}

/// The kind of client that captured the event.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
  Web,
  Mobile,
  Server,
  Desktop,
  #[default]
  Unknown,
}

// ─── Raw input ───────────────────────────────────────────────────────────────

/// An event exactly as decoded from the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
  pub event:      Option<String>,
  #[serde(default)]
  pub properties: Properties,
}

// ─── Canonical form ──────────────────────────────────────────────────────────

/// A validated, normalised event ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
  pub event_name:   String,
  pub category:     EventCategory,
  pub event_detail: Option<String>,
  /// The identifier the client used at capture time. Never rewritten.
  pub distinct_id:  String,
  pub session_id:   Option<String>,
  pub platform:     Platform,
  pub country_code: Option<String>,
  /// Event time as reported by the client.
  pub timestamp:    DateTime<Utc>,
  /// Client properties with every reserved system key removed.
  pub properties:   Properties,
}

// ─── Stored event ────────────────────────────────────────────────────────────

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub id:          i64,
  /// Resolved canonical identity; `None` while the distinct id is anonymous.
  pub user_id:     Option<String>,
  /// Server-assigned; used for introspection only.
  pub ingested_at: DateTime<Utc>,
  #[serde(flatten)]
  pub body:        CanonicalEvent,
}
