//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use stitch_core::{
  Error as CoreError,
  identity::{IDENTIFY_SOURCE, IdentityState, MappingType, MergeRecord, ProfileFields, StitchRequest},
  ingest::{Ingestor, RecordId},
  property::PropertyValue,
  store::EventStore,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn ingestor(store: &SqliteStore) -> Ingestor<SqliteStore> {
  Ingestor::new(Arc::new(store.clone()))
}

fn encode(value: serde_json::Value) -> String { STANDARD.encode(value.to_string()) }

/// A plain event for `distinct_id` with the current time.
fn track(name: &str, distinct_id: &str) -> String {
  encode(serde_json::json!({
    "event": name,
    "properties": {
      "distinct_id": distinct_id,
      "time": Utc::now().timestamp(),
      "$os": "iOS",
      "plan": "pro",
    }
  }))
}

fn identify(anonymous_id: &str, user_id: &str) -> String {
  encode(serde_json::json!({
    "event": "$identify",
    "properties": {
      "distinct_id": user_id,
      "time": Utc::now().timestamp(),
      "$anon_distinct_id": anonymous_id,
      "$user_id": user_id,
    }
  }))
}

async fn user_ids(s: &SqliteStore, distinct_id: &str) -> Vec<Option<String>> {
  s.events_for(distinct_id.into())
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.user_id)
    .collect()
}

// ─── Identity store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_creates_anonymous_identity() {
  let s = store().await;

  let id = s.upsert_identity("anon-1".into(), Some("dev-1".into())).await.unwrap();
  let identity = s.find_identity("anon-1".into()).await.unwrap().unwrap();

  assert_eq!(identity.id, id);
  assert_eq!(identity.state, IdentityState::Anonymous);
  assert_eq!(identity.user_id, None);
  assert_eq!(identity.device_ids, vec!["dev-1".to_owned()]);
  assert_eq!(identity.first_seen, identity.last_seen);
}

#[tokio::test]
async fn upsert_is_idempotent_and_unions_devices() {
  let s = store().await;

  let a = s.upsert_identity("anon-1".into(), Some("dev-1".into())).await.unwrap();
  let b = s.upsert_identity("anon-1".into(), Some("dev-1".into())).await.unwrap();
  let c = s.upsert_identity("anon-1".into(), Some("dev-2".into())).await.unwrap();
  let d = s.upsert_identity("anon-1".into(), None).await.unwrap();
  assert!(a == b && b == c && c == d);

  let identity = s.find_identity("anon-1".into()).await.unwrap().unwrap();
  assert_eq!(identity.device_ids, vec!["dev-1".to_owned(), "dev-2".to_owned()]);
  assert!(identity.last_seen >= identity.first_seen);
}

#[tokio::test]
async fn concurrent_first_sight_creates_one_identity() {
  let s = store().await;
  let ingest = ingestor(&s);

  let (first, second) = (track("Page View", "anon-new"), track("Page View", "anon-new"));
  let (a, b) = tokio::join!(
    ingest.ingest(&first, Some("dev-a")),
    ingest.ingest(&second, Some("dev-b")),
  );
  a.unwrap();
  b.unwrap();

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.anonymous_identities, 1);
  assert_eq!(stats.total_events, 2);

  let identity = s.find_identity("anon-new".into()).await.unwrap().unwrap();
  assert_eq!(identity.device_ids.len(), 2);
}

#[tokio::test]
async fn find_missing_identity_returns_none() {
  let s = store().await;
  assert!(s.find_identity("nobody".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn profile_update_is_last_write_wins() {
  let s = store().await;

  let first = ProfileFields {
    email: Some("old@example.com".into()),
    first_name: Some("Ada".into()),
    properties: [("tier".to_owned(), PropertyValue::from("gold"))].into(),
    ..Default::default()
  };
  let second = ProfileFields {
    email: Some("new@example.com".into()),
    properties: [
      ("tier".to_owned(), PropertyValue::Null),
      ("city".to_owned(), PropertyValue::from("Oslo")),
    ]
    .into(),
    ..Default::default()
  };

  let a = s.update_profile("user-1".into(), first).await.unwrap();
  let b = s.update_profile("user-1".into(), second).await.unwrap();
  assert_eq!(a, b);

  let identity = s.find_identity("user-1".into()).await.unwrap().unwrap();
  assert_eq!(identity.email.as_deref(), Some("new@example.com"));
  assert_eq!(identity.first_name.as_deref(), Some("Ada"), "absent fields are kept");
  assert_eq!(identity.properties.get("city"), Some(&PropertyValue::from("Oslo")));
  assert!(!identity.properties.contains_key("tier"), "null removes the key");
}

#[tokio::test]
async fn promote_is_idempotent() {
  let s = store().await;
  s.upsert_identity("anon-1".into(), Some("dev-1".into())).await.unwrap();

  let a = s
    .promote_to_identified("anon-1".into(), "user-1".into(), "user-1".into(), None)
    .await
    .unwrap();
  let b = s
    .promote_to_identified("anon-1".into(), "user-1".into(), "user-1".into(), None)
    .await
    .unwrap();
  assert_eq!(a, b);

  let identity = s.find_identity("user-1".into()).await.unwrap().unwrap();
  assert_eq!(identity.state, IdentityState::Identified);
  assert_eq!(identity.user_id.as_deref(), Some("user-1"));
  assert_eq!(identity.anonymous_id.as_deref(), Some("anon-1"));
  assert_eq!(identity.device_ids, vec!["dev-1".to_owned()]);
  assert!(s.find_identity("anon-1".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn promote_folds_anonymous_row_into_existing_user() {
  let s = store().await;
  s.upsert_identity("anon-1".into(), Some("dev-1".into())).await.unwrap();
  let user_row = s
    .update_profile("user-1".into(), ProfileFields {
      email: Some("u@example.com".into()),
      ..Default::default()
    })
    .await
    .unwrap();

  let id = s
    .promote_to_identified(
      "anon-1".into(),
      "user-1".into(),
      "user-1".into(),
      Some("dev-2".into()),
    )
    .await
    .unwrap();
  assert_eq!(id, user_row);

  let identity = s.find_identity("user-1".into()).await.unwrap().unwrap();
  assert_eq!(identity.email.as_deref(), Some("u@example.com"));
  assert_eq!(identity.anonymous_id.as_deref(), Some("anon-1"));
  assert_eq!(identity.device_ids.len(), 2);
  assert!(s.find_identity("anon-1".into()).await.unwrap().is_none());

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.anonymous_identities, 0);
  assert_eq!(stats.identified_identities, 1);
}

// ─── Mapping ledger ──────────────────────────────────────────────────────────

fn merge(user: &str, mapped: &str, delta: u64) -> MergeRecord {
  MergeRecord {
    canonical_user_id:     user.into(),
    mapped_id:             mapped.into(),
    mapping_type:          MappingType::DeviceId,
    source:                IDENTIFY_SOURCE.into(),
    events_stitched_delta: delta,
  }
}

#[tokio::test]
async fn record_merge_accumulates() {
  let s = store().await;
  s.record_merge(merge("user-1", "anon-1", 2)).await.unwrap();
  s.record_merge(merge("user-1", "anon-1", 3)).await.unwrap();

  let edges = s.mappings_for("anon-1".into()).await.unwrap();
  assert_eq!(edges.len(), 1);
  assert_eq!(edges[0].events_stitched, 5);
  assert_eq!(edges[0].confidence_score, 1.0);
  assert_eq!(edges[0].source, IDENTIFY_SOURCE);
  assert!(edges[0].last_seen >= edges[0].first_seen);
}

#[tokio::test]
async fn latest_mapping_prefers_most_recent_edge() {
  let s = store().await;
  s.record_merge(merge("user-1", "anon-1", 0)).await.unwrap();
  s.record_merge(merge("user-2", "anon-1", 0)).await.unwrap();

  let edge = s
    .find_latest_mapping("anon-1".into(), MappingType::DeviceId)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(edge.canonical_user_id, "user-2");

  assert!(
    s.find_latest_mapping("anon-404".into(), MappingType::DeviceId)
      .await
      .unwrap()
      .is_none()
  );
}

// ─── Stitching ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn stitch_rewrites_anonymous_history() {
  let s = store().await;
  let ingest = ingestor(&s);
  for _ in 0..3 {
    ingest.ingest(&track("Page View", "anon-1"), Some("dev-1")).await.unwrap();
  }
  assert_eq!(user_ids(&s, "anon-1").await, vec![None, None, None]);

  let outcome = s.stitch(StitchRequest::new("anon-1", "user-1")).await.unwrap();
  assert_eq!(outcome.events_stitched, 3);
  assert!(!outcome.conflict_detected);
  assert_eq!(outcome.previous_user_id, None);

  assert_eq!(user_ids(&s, "anon-1").await, vec![Some("user-1".to_owned()); 3]);

  let edge = s
    .find_latest_mapping("anon-1".into(), MappingType::DeviceId)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(edge.canonical_user_id, "user-1");
  assert_eq!(edge.events_stitched, 3);

  let identity = s.find_identity("user-1".into()).await.unwrap().unwrap();
  assert_eq!(identity.id, outcome.identity_id);
  assert_eq!(identity.state, IdentityState::Identified);
}

#[tokio::test]
async fn repeated_stitch_counts_nothing_twice() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();

  let first = s.stitch(StitchRequest::new("anon-1", "user-1")).await.unwrap();
  let second = s.stitch(StitchRequest::new("anon-1", "user-1")).await.unwrap();
  assert_eq!(first.events_stitched, 1);
  assert_eq!(second.events_stitched, 0);
  assert!(!second.conflict_detected);
  assert_eq!(first.identity_id, second.identity_id);

  let edges = s.mappings_for("anon-1".into()).await.unwrap();
  assert_eq!(edges.len(), 1);
  assert_eq!(edges[0].events_stitched, 1);
}

#[tokio::test]
async fn stitch_to_another_user_reports_conflict() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();

  s.stitch(StitchRequest::new("anon-1", "user-9")).await.unwrap();
  let outcome = s
    .stitch(StitchRequest::new("anon-1", "user-42"))
    .await
    .unwrap();

  assert!(outcome.conflict_detected);
  assert_eq!(outcome.previous_user_id.as_deref(), Some("user-9"));
  assert_eq!(outcome.events_stitched, 1, "the event moves to the new user");
  assert_eq!(user_ids(&s, "anon-1").await, vec![Some("user-42".to_owned())]);

  let edge = s
    .find_latest_mapping("anon-1".into(), MappingType::DeviceId)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(edge.canonical_user_id, "user-42");
  assert_eq!(s.mappings_for("anon-1".into()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn stitch_records_device_edge_without_count() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), Some("dev-1")).await.unwrap();

  s.stitch(StitchRequest::new("anon-1", "user-1").with_device("dev-1"))
    .await
    .unwrap();

  let edge = s
    .find_latest_mapping("dev-1".into(), MappingType::DeviceId)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(edge.canonical_user_id, "user-1");
  assert_eq!(edge.events_stitched, 0);

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_mappings, 2);
  assert_eq!(stats.events_stitched_total, 1);
}

#[tokio::test]
async fn stitch_of_unknown_anonymous_id_creates_identity() {
  let s = store().await;
  let outcome = s.stitch(StitchRequest::new("anon-x", "user-x")).await.unwrap();
  assert_eq!(outcome.events_stitched, 0);

  let identity = s.find_identity("user-x".into()).await.unwrap().unwrap();
  assert_eq!(identity.id, outcome.identity_id);
  assert_eq!(identity.anonymous_id.as_deref(), Some("anon-x"));
}

// ─── Ingest pipeline ─────────────────────────────────────────────────────────

#[tokio::test]
async fn track_stores_sanitized_event_without_user() {
  let s = store().await;
  let result = ingestor(&s)
    .ingest(&track("Add To Cart", "anon-1"), Some("dev-1"))
    .await
    .unwrap();
  assert!(matches!(result.record_id, RecordId::Event(_)));
  assert_eq!(result.resolved_device_id, "dev-1");
  assert!(result.stitch.is_none());

  let events = s.events_for("anon-1".into()).await.unwrap();
  assert_eq!(events.len(), 1);
  let event = &events[0];
  assert_eq!(event.user_id, None);
  assert_eq!(event.body.event_name, "Add To Cart");
  assert_eq!(event.body.category.to_string(), "ecommerce");
  assert_eq!(event.body.platform.to_string(), "mobile");
  assert_eq!(event.body.properties.get("plan"), Some(&PropertyValue::from("pro")));
  assert!(!event.body.properties.contains_key("$os"));
  assert!(!event.body.properties.contains_key("distinct_id"));
}

#[tokio::test]
async fn events_after_identify_resolve_to_user() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();
  ingest.ingest(&identify("anon-1", "user-1"), None).await.unwrap();

  // Late events still sent under the anonymous id follow the mapping edge.
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();
  // Events sent under the user's own distinct id follow the identity row.
  ingest.ingest(&track("Page View", "user-1"), None).await.unwrap();

  assert_eq!(user_ids(&s, "anon-1").await, vec![Some("user-1".to_owned()); 2]);
  assert_eq!(user_ids(&s, "user-1").await, vec![Some("user-1".to_owned()); 2]);
}

#[tokio::test]
async fn identify_end_to_end() {
  let s = store().await;
  let ingest = ingestor(&s);
  for _ in 0..2 {
    ingest.ingest(&track("Workout Started", "anon-7"), Some("dev-7")).await.unwrap();
  }

  let result = ingest.ingest(&identify("anon-7", "user-7"), Some("dev-7")).await.unwrap();
  let outcome = result.stitch.expect("identify reports a stitch outcome");
  assert_eq!(outcome.events_stitched, 2);
  assert!(!outcome.conflict_detected);

  let identity = s.find_identity("user-7".into()).await.unwrap().unwrap();
  assert_eq!(identity.state, IdentityState::Identified);
  assert_eq!(identity.device_ids, vec!["dev-7".to_owned()]);

  // The identify event itself is stored under the user.
  let own = s.events_for("user-7".into()).await.unwrap();
  assert_eq!(own.len(), 1);
  assert_eq!(own[0].body.event_name, "$identify");
  assert_eq!(own[0].user_id.as_deref(), Some("user-7"));
}

#[tokio::test]
async fn repeated_identify_without_device_keeps_one_mapping() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();

  for _ in 0..3 {
    let result = ingest.ingest(&identify("anon-1", "user-1"), None).await.unwrap();
    assert!(!result.resolved_device_id.is_empty());
  }

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_mappings, 1);
  assert_eq!(stats.events_stitched_total, 1);

  let identity = s.find_identity("user-1".into()).await.unwrap().unwrap();
  assert!(identity.device_ids.is_empty());
}

#[tokio::test]
async fn invalid_payload_changes_nothing() {
  let s = store().await;
  let bad = encode(serde_json::json!({"event": "Page View", "properties": {"time": 1}}));

  let err = ingestor(&s).ingest(&bad, Some("dev-1")).await.unwrap_err();
  assert!(matches!(err, CoreError::Validation(_)));
  assert_eq!(s.stats().await.unwrap(), Default::default());
}

#[tokio::test]
async fn profile_payload_updates_identity() {
  let s = store().await;
  let payload = encode(serde_json::json!({
    "$distinct_id": "user-5",
    "$set": {"$email": "five@example.com", "$first_name": "Five", "team": "blue"}
  }));

  let result = ingestor(&s).ingest(&payload, None).await.unwrap();
  let RecordId::Identity(id) = result.record_id else {
    panic!("expected an identity record");
  };

  let identity = s.find_identity("user-5".into()).await.unwrap().unwrap();
  assert_eq!(identity.id, id);
  assert_eq!(identity.email.as_deref(), Some("five@example.com"));
  assert_eq!(identity.first_name.as_deref(), Some("Five"));
  assert_eq!(identity.properties.get("team"), Some(&PropertyValue::from("blue")));
  assert!(!identity.properties.contains_key("$email"));
}

#[tokio::test]
async fn stats_count_recent_events_by_event_time() {
  let s = store().await;
  let ingest = ingestor(&s);
  ingest.ingest(&track("Page View", "anon-1"), None).await.unwrap();

  let old = encode(serde_json::json!({
    "event": "Page View",
    "properties": {"distinct_id": "anon-1", "time": 1_000_000_000}
  }));
  ingest.ingest(&old, None).await.unwrap();

  let stats = s.stats().await.unwrap();
  assert_eq!(stats.total_events, 2);
  assert_eq!(stats.events_last_24h, 1);
  assert_eq!(stats.anonymous_identities, 1);
}

// ─── Atomicity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_transaction_rolls_back_every_write() {
  let s = store().await;

  let err = s
    .transact_for_test(|tx, now| {
      crate::identity::upsert(tx, "anon-rollback", Some("dev-1"), now)?;
      Err::<(), _>(Error::InvariantViolation("forced".into()))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvariantViolation(ref m) if m == "forced"));

  assert!(s.find_identity("anon-rollback".into()).await.unwrap().is_none());
  assert_eq!(s.stats().await.unwrap().anonymous_identities, 0);
}

#[tokio::test]
async fn store_errors_map_onto_core_taxonomy() {
  let invariant: CoreError = Error::InvariantViolation("x".into()).into();
  assert!(matches!(invariant, CoreError::InvariantViolation(_)));
  assert!(!invariant.is_retryable());

  let busy: CoreError = Error::Sqlite(rusqlite::Error::SqliteFailure(
    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
    None,
  ))
  .into();
  assert!(busy.is_retryable());
}
