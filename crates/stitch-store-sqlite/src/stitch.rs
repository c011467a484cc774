//! Retroactive identity stitching.

use rusqlite::{Transaction, params};
use stitch_core::identity::{MappingType, MergeRecord, StitchOutcome, StitchRequest};

use crate::{Error, Result, encode::decode_count, identity, ledger};

/// Merge `request.anonymous_id` into `request.user_id` inside `tx`.
///
/// Events already attributed to the user are not counted again, so repeating
/// an identify yields `events_stitched == 0` and leaves the edge counter
/// unchanged.
pub fn stitch(tx: &Transaction<'_>, request: &StitchRequest, now: &str) -> Result<StitchOutcome> {
  let StitchRequest { anonymous_id, user_id, distinct_id, device_id, source } = request;

  let previous_user_id = ledger::find_latest_mapping(tx, anonymous_id, MappingType::DeviceId)?
    .map(|edge| edge.canonical_user_id)
    .filter(|prev| prev != user_id);
  let conflict_detected = previous_user_id.is_some();

  let pending: i64 = tx.query_row(
    "SELECT COUNT(*) FROM events
     WHERE distinct_id = ?1 AND (user_id IS NULL OR user_id != ?2)",
    params![anonymous_id, user_id],
    |r| r.get(0),
  )?;

  let rewritten = tx.execute(
    "UPDATE events SET user_id = ?2
     WHERE distinct_id = ?1 AND (user_id IS NULL OR user_id != ?2)",
    params![anonymous_id, user_id],
  )?;

  if i64::try_from(rewritten).ok() != Some(pending) {
    return Err(Error::InvariantViolation(format!(
      "stitching {anonymous_id} -> {user_id}: expected to rewrite {pending} events, \
       rewrote {rewritten}"
    )));
  }
  let events_stitched = decode_count(pending);

  ledger::record_merge(
    tx,
    &MergeRecord {
      canonical_user_id:     user_id.clone(),
      mapped_id:             anonymous_id.clone(),
      mapping_type:          MappingType::DeviceId,
      source:                source.clone(),
      events_stitched_delta: events_stitched,
    },
    now,
  )?;

  // The physical device gets its own edge so events sent under it resolve
  // to the user too. It re-attributes nothing by itself.
  if let Some(device) = device_id.as_deref().filter(|d| *d != anonymous_id.as_str()) {
    ledger::record_merge(
      tx,
      &MergeRecord {
        canonical_user_id:     user_id.clone(),
        mapped_id:             device.to_owned(),
        mapping_type:          MappingType::DeviceId,
        source:                source.clone(),
        events_stitched_delta: 0,
      },
      now,
    )?;
  }

  let identity_id = identity::promote_to_identified(
    tx,
    anonymous_id,
    distinct_id,
    user_id,
    device_id.as_deref(),
    now,
  )?;

  Ok(StitchOutcome { identity_id, events_stitched, conflict_detected, previous_user_id })
}
