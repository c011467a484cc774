//! [`SqliteStore`]: the SQLite implementation of [`EventStore`].

use std::path::Path;

use chrono::{Duration, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use stitch_core::{
  event::Event,
  identity::{
    Identity, MappingEdge, MappingType, MergeRecord, ProfileFields, StitchOutcome,
    StitchRequest,
  },
  ingest::{Applied, IngestCommand},
  store::{EventStore, StoreStats},
};

use crate::{
  Error, Result, coordinator,
  encode::{decode_count, encode_dt},
  events, identity, ledger,
  schema::SCHEMA,
  stitch,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An event and identity store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted. All clones
/// share one connection thread, so writes are serialised in arrival order.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Flush and close the underlying connection. Other clones of this store
  /// fail with a database error afterwards.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` inside one `IMMEDIATE` transaction.
  ///
  /// The write lock is taken up front, so a transaction never has to upgrade
  /// from a read lock halfway through. Any error rolls everything back. `f`
  /// receives the transaction timestamp so every row it touches agrees on
  /// "now".
  async fn transact<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>, &str) -> Result<T> + Send + 'static,
  {
    let now = encode_dt(Utc::now());
    let out = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx, &now)?;
        tx.commit()?;
        Ok(out)
      })
      .await?;
    Ok(out)
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
  {
    let out = self.conn.call(move |conn| Ok(f(conn)?)).await?;
    Ok(out)
  }
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
  type Error = Error;

  // ── Ingestion ─────────────────────────────────────────────────────────────

  async fn apply(&self, command: IngestCommand) -> Result<Applied> {
    self
      .transact(move |tx, now| coordinator::apply(tx, &command, now))
      .await
  }

  // ── Identity store ────────────────────────────────────────────────────────

  async fn upsert_identity(
    &self,
    distinct_id: String,
    device_id: Option<String>,
  ) -> Result<i64> {
    self
      .transact(move |tx, now| {
        identity::upsert(tx, &distinct_id, device_id.as_deref(), now)
      })
      .await
  }

  async fn find_identity(&self, distinct_id: String) -> Result<Option<Identity>> {
    self
      .read(move |conn| identity::find_by_distinct_id(conn, &distinct_id))
      .await
  }

  async fn promote_to_identified(
    &self,
    anonymous_id: String,
    distinct_id: String,
    user_id: String,
    device_id: Option<String>,
  ) -> Result<i64> {
    self
      .transact(move |tx, now| {
        identity::promote_to_identified(
          tx,
          &anonymous_id,
          &distinct_id,
          &user_id,
          device_id.as_deref(),
          now,
        )
      })
      .await
  }

  async fn update_profile(&self, distinct_id: String, fields: ProfileFields) -> Result<i64> {
    self
      .transact(move |tx, now| identity::update_profile(tx, &distinct_id, &fields, now))
      .await
  }

  // ── Mapping ledger ────────────────────────────────────────────────────────

  async fn record_merge(&self, merge: MergeRecord) -> Result<()> {
    self
      .transact(move |tx, now| ledger::record_merge(tx, &merge, now))
      .await
  }

  async fn find_latest_mapping(
    &self,
    mapped_id: String,
    mapping_type: MappingType,
  ) -> Result<Option<MappingEdge>> {
    self
      .read(move |conn| ledger::find_latest_mapping(conn, &mapped_id, mapping_type))
      .await
  }

  async fn mappings_for(&self, mapped_id: String) -> Result<Vec<MappingEdge>> {
    self
      .read(move |conn| ledger::mappings_for(conn, &mapped_id))
      .await
  }

  // ── Stitching ─────────────────────────────────────────────────────────────

  async fn stitch(&self, request: StitchRequest) -> Result<StitchOutcome> {
    self
      .transact(move |tx, now| stitch::stitch(tx, &request, now))
      .await
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn events_for(&self, distinct_id: String) -> Result<Vec<Event>> {
    self
      .read(move |conn| events::for_distinct_id(conn, &distinct_id))
      .await
  }

  async fn stats(&self) -> Result<StoreStats> {
    let since = encode_dt(Utc::now() - Duration::hours(24));

    self
      .read(move |conn| {
        let counts: [i64; 6] = conn.query_row(
          "SELECT
             (SELECT COUNT(*) FROM events),
             (SELECT COUNT(*) FROM events WHERE timestamp >= ?1),
             (SELECT COUNT(*) FROM identities WHERE state = 'anonymous'),
             (SELECT COUNT(*) FROM identities WHERE state = 'identified'),
             (SELECT COUNT(*) FROM identity_mappings),
             (SELECT COALESCE(SUM(events_stitched), 0) FROM identity_mappings)",
          rusqlite::params![since],
          |r| {
            Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?])
          },
        )?;
        let [total, last_24h, anonymous, identified, mappings, stitched] = counts;

        Ok(StoreStats {
          total_events:          decode_count(total),
          events_last_24h:       decode_count(last_24h),
          anonymous_identities:  decode_count(anonymous),
          identified_identities: decode_count(identified),
          total_mappings:        decode_count(mappings),
          events_stitched_total: decode_count(stitched),
        })
      })
      .await
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Run an arbitrary transaction; lets tests prove that a failing step rolls
  /// back the writes before it.
  pub(crate) async fn transact_for_test<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>, &str) -> Result<T> + Send + 'static,
  {
    self.transact(f).await
  }
}
