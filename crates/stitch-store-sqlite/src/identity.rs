//! Identity store operations.
//!
//! Every write here runs inside a caller-owned transaction and uses a single
//! conditional statement (`INSERT … ON CONFLICT … DO UPDATE`) rather than a
//! read followed by a write, so concurrent requests for a brand-new distinct
//! id converge on one row.

use rusqlite::{Connection, OptionalExtension as _, Transaction, params};
use stitch_core::identity::{Identity, MappingType, ProfileFields};

use crate::{
  Result,
  encode::{IDENTITY_COLUMNS, RawIdentity, encode_properties},
  ledger,
};

/// Ensure an identity exists for `distinct_id` and union `device_id` into its
/// device set.
pub fn upsert(
  tx: &Transaction<'_>,
  distinct_id: &str,
  device_id: Option<&str>,
  now: &str,
) -> Result<i64> {
  let id: i64 = tx.query_row(
    "INSERT INTO identities (distinct_id, state, first_seen, last_seen)
     VALUES (?1, 'anonymous', ?2, ?2)
     ON CONFLICT (distinct_id) DO UPDATE
       SET last_seen = MAX(identities.last_seen, excluded.last_seen)
     RETURNING id",
    params![distinct_id, now],
    |r| r.get(0),
  )?;

  if let Some(device) = device_id {
    add_device(tx, id, device, now)?;
  }
  Ok(id)
}

fn add_device(tx: &Transaction<'_>, identity_id: i64, device_id: &str, now: &str) -> Result<()> {
  tx.execute(
    "INSERT INTO identity_devices (identity_id, device_id, first_seen)
     VALUES (?1, ?2, ?3)
     ON CONFLICT (identity_id, device_id) DO NOTHING",
    params![identity_id, device_id, now],
  )?;
  Ok(())
}

fn id_for(conn: &Connection, distinct_id: &str) -> Result<Option<i64>> {
  Ok(
    conn
      .query_row(
        "SELECT id FROM identities WHERE distinct_id = ?1",
        params![distinct_id],
        |r| r.get(0),
      )
      .optional()?,
  )
}

/// Load an identity and its device set.
pub fn find_by_distinct_id(conn: &Connection, distinct_id: &str) -> Result<Option<Identity>> {
  let raw: Option<RawIdentity> = conn
    .query_row(
      &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE distinct_id = ?1"),
      params![distinct_id],
      RawIdentity::from_row,
    )
    .optional()?;

  let Some(raw) = raw else { return Ok(None) };

  let mut stmt = conn.prepare(
    "SELECT device_id FROM identity_devices
     WHERE identity_id = ?1
     ORDER BY first_seen, rowid",
  )?;
  let devices = stmt
    .query_map(params![raw.id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;

  raw.into_identity(devices).map(Some)
}

/// Move the identity for `anonymous_id` into the identified state under
/// `distinct_id`.
///
/// - only an anonymous row exists: it is promoted in place and renamed;
/// - only a row for `distinct_id` exists (or the anonymous row was already
///   promoted by an earlier call): that row is updated;
/// - both exist: the anonymous row is folded into the `distinct_id` row and
///   removed, so the unique distinct id constraint holds;
/// - neither exists: a new identified row is created.
///
/// `anonymous_id` is preserved on the resulting row; an existing value is
/// never overwritten. State never moves back to anonymous.
pub fn promote_to_identified(
  tx: &Transaction<'_>,
  anonymous_id: &str,
  distinct_id: &str,
  user_id: &str,
  device_id: Option<&str>,
  now: &str,
) -> Result<i64> {
  let anon_row = id_for(tx, anonymous_id)?;
  let target_row = id_for(tx, distinct_id)?;

  let id = match (anon_row, target_row) {
    (Some(anon), Some(target)) if anon != target => {
      fold_into(tx, anon, target)?;
      target
    }
    (Some(anon), _) => {
      tx.execute(
        "UPDATE identities SET distinct_id = ?2 WHERE id = ?1",
        params![anon, distinct_id],
      )?;
      anon
    }
    (None, Some(target)) => target,
    (None, None) => tx.query_row(
      "INSERT INTO identities (distinct_id, state, first_seen, last_seen)
       VALUES (?1, 'anonymous', ?2, ?2)
       RETURNING id",
      params![distinct_id, now],
      |r| r.get(0),
    )?,
  };

  tx.execute(
    "UPDATE identities
     SET user_id      = ?2,
         state        = 'identified',
         anonymous_id = COALESCE(anonymous_id, ?3),
         last_seen    = MAX(last_seen, ?4)
     WHERE id = ?1",
    params![id, user_id, anonymous_id, now],
  )?;

  if let Some(device) = device_id {
    add_device(tx, id, device, now)?;
  }
  Ok(id)
}

/// Merge the history of row `from` into row `into`, then delete `from`.
fn fold_into(tx: &Transaction<'_>, from: i64, into: i64) -> Result<()> {
  tx.execute(
    "INSERT INTO identity_devices (identity_id, device_id, first_seen)
     SELECT ?2, device_id, first_seen FROM identity_devices WHERE identity_id = ?1
     ON CONFLICT (identity_id, device_id) DO NOTHING",
    params![from, into],
  )?;

  // Profile fields already on `into` win; the anonymous row only fills gaps.
  tx.execute(
    "UPDATE identities AS t
     SET anonymous_id = COALESCE(t.anonymous_id, f.anonymous_id, f.distinct_id),
         email        = COALESCE(t.email, f.email),
         first_name   = COALESCE(t.first_name, f.first_name),
         last_name    = COALESCE(t.last_name, f.last_name),
         properties   = json_patch(f.properties, t.properties),
         first_seen   = MIN(t.first_seen, f.first_seen),
         last_seen    = MAX(t.last_seen, f.last_seen)
     FROM (SELECT * FROM identities WHERE id = ?1) AS f
     WHERE t.id = ?2",
    params![from, into],
  )?;

  tx.execute("DELETE FROM identities WHERE id = ?1", params![from])?;
  Ok(())
}

/// Last-write-wins update of the supplied profile fields. Creates an
/// anonymous identity when `distinct_id` has never been seen.
pub fn update_profile(
  tx: &Transaction<'_>,
  distinct_id: &str,
  fields: &ProfileFields,
  now: &str,
) -> Result<i64> {
  let props = encode_properties(&fields.properties)?;

  let id: i64 = tx.query_row(
    "INSERT INTO identities
       (distinct_id, state, email, first_name, last_name, properties, first_seen, last_seen)
     VALUES (?1, 'anonymous', ?2, ?3, ?4, json_patch('{}', ?5), ?6, ?6)
     ON CONFLICT (distinct_id) DO UPDATE SET
       email      = COALESCE(excluded.email, identities.email),
       first_name = COALESCE(excluded.first_name, identities.first_name),
       last_name  = COALESCE(excluded.last_name, identities.last_name),
       properties = json_patch(identities.properties, ?5),
       last_seen  = MAX(identities.last_seen, excluded.last_seen)
     RETURNING id",
    params![
      distinct_id,
      fields.email,
      fields.first_name,
      fields.last_name,
      props,
      now,
    ],
    |r| r.get(0),
  )?;
  Ok(id)
}

/// The canonical user a distinct id currently resolves to, if any.
///
/// An explicit mapping edge wins over the identity row, so events sent under
/// an already-stitched anonymous id are attributed immediately.
pub fn resolve_user_id(conn: &Connection, distinct_id: &str) -> Result<Option<String>> {
  if let Some(edge) = ledger::find_latest_mapping(conn, distinct_id, MappingType::DeviceId)? {
    return Ok(Some(edge.canonical_user_id));
  }

  Ok(
    conn
      .query_row(
        "SELECT user_id FROM identities
         WHERE distinct_id = ?1 AND state = 'identified'",
        params![distinct_id],
        |r| r.get::<_, Option<String>>(0),
      )
      .optional()?
      .flatten(),
  )
}
