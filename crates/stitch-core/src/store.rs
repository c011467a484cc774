//! The `EventStore` trait and supporting read-model types.
//!
//! The trait is implemented by storage backends (e.g. `stitch-store-sqlite`).
//! Higher layers (`stitch-api`, the [`Ingestor`](crate::ingest::Ingestor))
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  event::Event,
  identity::{
    Identity, MappingEdge, MappingType, MergeRecord, ProfileFields,
    StitchOutcome, StitchRequest,
  },
  ingest::{Applied, IngestCommand},
};

// ─── Read model ──────────────────────────────────────────────────────────────

/// Aggregate counts for health and introspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
  pub total_events:          u64,
  /// Events whose event time falls within the last 24 hours.
  pub events_last_24h:       u64,
  pub anonymous_identities:  u64,
  pub identified_identities: u64,
  pub total_mappings:        u64,
  /// Sum of `events_stitched` over every mapping edge.
  pub events_stitched_total: u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a durable event and identity store.
///
/// Every method is one transaction. Implementations must not cache identity
/// state between calls; each operation re-reads from durable storage.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EventStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Ingestion ─────────────────────────────────────────────────────────

  /// Execute one classified ingest request atomically: either every write it
  /// implies becomes visible, or none does.
  fn apply(
    &self,
    command: IngestCommand,
  ) -> impl Future<Output = Result<Applied, Self::Error>> + Send + '_;

  // ── Identity store ────────────────────────────────────────────────────

  /// Create the identity for `distinct_id` if absent, otherwise refresh
  /// `last_seen`. `device_id` is unioned into the device set. Safe under
  /// concurrent calls for the same distinct id.
  fn upsert_identity(
    &self,
    distinct_id: String,
    device_id: Option<String>,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Retrieve an identity by distinct id. Returns `None` if not found.
  fn find_identity(
    &self,
    distinct_id: String,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  /// Move (or create) the identity for `anonymous_id` into the identified
  /// state under `distinct_id`. Idempotent.
  fn promote_to_identified(
    &self,
    anonymous_id: String,
    distinct_id: String,
    user_id: String,
    device_id: Option<String>,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Last-write-wins update of the supplied profile fields.
  fn update_profile(
    &self,
    distinct_id: String,
    fields: ProfileFields,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  // ── Mapping ledger ────────────────────────────────────────────────────

  /// Create the edge if absent, otherwise add to its `events_stitched`.
  fn record_merge(
    &self,
    merge: MergeRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The highest-confidence, most recently seen edge for `mapped_id`.
  fn find_latest_mapping(
    &self,
    mapped_id: String,
    mapping_type: MappingType,
  ) -> impl Future<Output = Result<Option<MappingEdge>, Self::Error>> + Send + '_;

  /// Every edge that points at `mapped_id`, latest first.
  fn mappings_for(
    &self,
    mapped_id: String,
  ) -> impl Future<Output = Result<Vec<MappingEdge>, Self::Error>> + Send + '_;

  // ── Stitching ─────────────────────────────────────────────────────────

  /// Merge an anonymous identifier into a canonical user, re-attributing its
  /// historical events.
  fn stitch(
    &self,
    request: StitchRequest,
  ) -> impl Future<Output = Result<StitchOutcome, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// All events captured under `distinct_id`, oldest first.
  fn events_for(
    &self,
    distinct_id: String,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  fn stats(&self) -> impl Future<Output = Result<StoreStats, Self::Error>> + Send + '_;
}
