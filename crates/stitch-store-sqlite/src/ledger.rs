//! The mapping ledger: edges of the identity graph with cumulative stitch
//! counts.

use rusqlite::{Connection, OptionalExtension as _, Transaction, params};
use stitch_core::identity::{MappingEdge, MappingType, MergeRecord};

use crate::{
  Result,
  encode::{MAPPING_COLUMNS, RawMapping, encode_count},
};

/// Exact identifier matches are the only kind of edge written today.
pub const EXACT_CONFIDENCE: f64 = 1.0;

/// Create the edge if absent, otherwise add the delta to its counter.
pub fn record_merge(tx: &Transaction<'_>, merge: &MergeRecord, now: &str) -> Result<()> {
  tx.execute(
    "INSERT INTO identity_mappings
       (canonical_user_id, mapped_id, mapping_type, confidence_score,
        source, events_stitched, first_seen, last_seen)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
     ON CONFLICT (canonical_user_id, mapped_id, mapping_type) DO UPDATE SET
       events_stitched = identity_mappings.events_stitched + excluded.events_stitched,
       last_seen       = MAX(identity_mappings.last_seen, excluded.last_seen)",
    params![
      merge.canonical_user_id,
      merge.mapped_id,
      merge.mapping_type.as_ref(),
      EXACT_CONFIDENCE,
      merge.source,
      encode_count(merge.events_stitched_delta),
      now,
    ],
  )?;
  Ok(())
}

/// The edge a lookup for `mapped_id` resolves to: highest confidence first,
/// then most recently seen.
pub fn find_latest_mapping(
  conn: &Connection,
  mapped_id: &str,
  mapping_type: MappingType,
) -> Result<Option<MappingEdge>> {
  conn
    .query_row(
      &format!(
        "SELECT {MAPPING_COLUMNS} FROM identity_mappings
         WHERE mapped_id = ?1 AND mapping_type = ?2
         ORDER BY confidence_score DESC, last_seen DESC, id DESC
         LIMIT 1"
      ),
      params![mapped_id, mapping_type.as_ref()],
      RawMapping::from_row,
    )
    .optional()?
    .map(RawMapping::into_edge)
    .transpose()
}

pub fn mappings_for(conn: &Connection, mapped_id: &str) -> Result<Vec<MappingEdge>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {MAPPING_COLUMNS} FROM identity_mappings
     WHERE mapped_id = ?1
     ORDER BY last_seen DESC, id DESC"
  ))?;
  let raws = stmt
    .query_map(params![mapped_id], RawMapping::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawMapping::into_edge).collect()
}
