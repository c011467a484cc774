//! The append-only event log.

use rusqlite::{Connection, Transaction, params};
use stitch_core::event::{CanonicalEvent, Event};

use crate::{
  Result,
  encode::{EVENT_COLUMNS, RawEvent, encode_dt, encode_properties},
};

pub fn insert(
  tx: &Transaction<'_>,
  event: &CanonicalEvent,
  user_id: Option<&str>,
  now: &str,
) -> Result<i64> {
  let id: i64 = tx.query_row(
    "INSERT INTO events
       (event_name, event_category, event_detail, distinct_id, user_id,
        session_id, platform, country_code, timestamp, properties, ingested_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
     RETURNING id",
    params![
      event.event_name,
      event.category.as_ref(),
      event.event_detail,
      event.distinct_id,
      user_id,
      event.session_id,
      event.platform.as_ref(),
      event.country_code,
      encode_dt(event.timestamp),
      encode_properties(&event.properties)?,
      now,
    ],
    |r| r.get(0),
  )?;
  Ok(id)
}

/// Events captured under `distinct_id`, in event-time order.
pub fn for_distinct_id(conn: &Connection, distinct_id: &str) -> Result<Vec<Event>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {EVENT_COLUMNS} FROM events
     WHERE distinct_id = ?1
     ORDER BY timestamp, id"
  ))?;
  let raws = stmt
    .query_map(params![distinct_id], RawEvent::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawEvent::into_event).collect()
}
