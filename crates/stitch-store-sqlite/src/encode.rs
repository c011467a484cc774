//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (UTC, microsecond
//! precision) so that lexicographic order in SQL equals chronological order.
//! Property bags are stored as compact JSON. Enums are stored as their
//! snake_case names.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use stitch_core::{
  event::{CanonicalEvent, Event},
  identity::{Identity, IdentityState, MappingEdge},
  property::Properties,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

/// Parse a strum-backed enum column.
pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownValue { kind, value: s.to_owned() })
}

// ─── Properties ──────────────────────────────────────────────────────────────

pub fn encode_properties(props: &Properties) -> Result<String> {
  Ok(serde_json::to_string(props)?)
}

pub fn decode_properties(s: &str) -> Result<Properties> {
  Ok(serde_json::from_str(s)?)
}

// ─── Counts ──────────────────────────────────────────────────────────────────

/// SQLite integers are signed; counts are never negative (CHECK constraints
/// and `COUNT(*)`), so clamping at zero only guards against corruption.
pub fn decode_count(n: i64) -> u64 { u64::try_from(n).unwrap_or_default() }

pub fn encode_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const EVENT_COLUMNS: &str = "id, event_name, event_category, event_detail, \
   distinct_id, user_id, session_id, platform, country_code, timestamp, \
   properties, ingested_at";

/// Raw values read directly from an `events` row.
pub struct RawEvent {
  pub id:             i64,
  pub event_name:     String,
  pub event_category: String,
  pub event_detail:   Option<String>,
  pub distinct_id:    String,
  pub user_id:        Option<String>,
  pub session_id:     Option<String>,
  pub platform:       String,
  pub country_code:   Option<String>,
  pub timestamp:      String,
  pub properties:     String,
  pub ingested_at:    String,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      event_name:     row.get(1)?,
      event_category: row.get(2)?,
      event_detail:   row.get(3)?,
      distinct_id:    row.get(4)?,
      user_id:        row.get(5)?,
      session_id:     row.get(6)?,
      platform:       row.get(7)?,
      country_code:   row.get(8)?,
      timestamp:      row.get(9)?,
      properties:     row.get(10)?,
      ingested_at:    row.get(11)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      id:          self.id,
      user_id:     self.user_id,
      ingested_at: decode_dt(&self.ingested_at)?,
      body:        CanonicalEvent {
        event_name:   self.event_name,
        category:     decode_enum("event category", &self.event_category)?,
        event_detail: self.event_detail,
        distinct_id:  self.distinct_id,
        session_id:   self.session_id,
        platform:     decode_enum("platform", &self.platform)?,
        country_code: self.country_code,
        timestamp:    decode_dt(&self.timestamp)?,
        properties:   decode_properties(&self.properties)?,
      },
    })
  }
}

pub const IDENTITY_COLUMNS: &str = "id, distinct_id, user_id, anonymous_id, \
   state, email, first_name, last_name, properties, first_seen, last_seen";

/// Raw values read directly from an `identities` row.
pub struct RawIdentity {
  pub id:           i64,
  pub distinct_id:  String,
  pub user_id:      Option<String>,
  pub anonymous_id: Option<String>,
  pub state:        String,
  pub email:        Option<String>,
  pub first_name:   Option<String>,
  pub last_name:    Option<String>,
  pub properties:   String,
  pub first_seen:   String,
  pub last_seen:    String,
}

impl RawIdentity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      distinct_id:  row.get(1)?,
      user_id:      row.get(2)?,
      anonymous_id: row.get(3)?,
      state:        row.get(4)?,
      email:        row.get(5)?,
      first_name:   row.get(6)?,
      last_name:    row.get(7)?,
      properties:   row.get(8)?,
      first_seen:   row.get(9)?,
      last_seen:    row.get(10)?,
    })
  }

  /// Decode the row; `device_ids` come from the `identity_devices` table.
  pub fn into_identity(self, device_ids: Vec<String>) -> Result<Identity> {
    let state: IdentityState = decode_enum("identity state", &self.state)?;
    if state == IdentityState::Identified && self.user_id.is_none() {
      return Err(Error::InvariantViolation(format!(
        "identity {} ({}) is identified but has no user_id",
        self.id, self.distinct_id
      )));
    }

    Ok(Identity {
      id: self.id,
      distinct_id: self.distinct_id,
      user_id: self.user_id,
      anonymous_id: self.anonymous_id,
      state,
      device_ids,
      email: self.email,
      first_name: self.first_name,
      last_name: self.last_name,
      properties: decode_properties(&self.properties)?,
      first_seen: decode_dt(&self.first_seen)?,
      last_seen: decode_dt(&self.last_seen)?,
    })
  }
}

pub const MAPPING_COLUMNS: &str = "id, canonical_user_id, mapped_id, \
   mapping_type, confidence_score, source, events_stitched, first_seen, \
   last_seen";

/// Raw values read directly from an `identity_mappings` row.
pub struct RawMapping {
  pub id:                i64,
  pub canonical_user_id: String,
  pub mapped_id:         String,
  pub mapping_type:      String,
  pub confidence_score:  f64,
  pub source:            String,
  pub events_stitched:   i64,
  pub first_seen:        String,
  pub last_seen:         String,
}

impl RawMapping {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      canonical_user_id: row.get(1)?,
      mapped_id:         row.get(2)?,
      mapping_type:      row.get(3)?,
      confidence_score:  row.get(4)?,
      source:            row.get(5)?,
      events_stitched:   row.get(6)?,
      first_seen:        row.get(7)?,
      last_seen:         row.get(8)?,
    })
  }

  pub fn into_edge(self) -> Result<MappingEdge> {
    Ok(MappingEdge {
      id:                self.id,
      canonical_user_id: self.canonical_user_id,
      mapped_id:         self.mapped_id,
      mapping_type:      decode_enum("mapping type", &self.mapping_type)?,
      confidence_score:  self.confidence_score,
      source:            self.source,
      events_stitched:   decode_count(self.events_stitched),
      first_seen:        decode_dt(&self.first_seen)?,
      last_seen:         decode_dt(&self.last_seen)?,
    })
  }
}
