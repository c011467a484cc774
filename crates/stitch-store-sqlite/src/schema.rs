//! SQL schema for the SQLite event store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! layout so future migrations can be gated on it.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

-- Events are append-only. The only UPDATE ever issued against this table is
-- the retroactive rewrite of user_id during stitching.
CREATE TABLE IF NOT EXISTS events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_name      TEXT NOT NULL,
    event_category  TEXT NOT NULL,
    event_detail    TEXT,
    distinct_id     TEXT NOT NULL,   -- as sent by the client; never rewritten
    user_id         TEXT,            -- canonical user; NULL while anonymous
    session_id      TEXT,
    platform        TEXT NOT NULL DEFAULT 'unknown',
    country_code    TEXT,
    timestamp       TEXT NOT NULL,   -- event time, RFC 3339 UTC, microseconds
    properties      TEXT NOT NULL DEFAULT '{}',
    ingested_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identities (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    distinct_id   TEXT NOT NULL UNIQUE,
    user_id       TEXT,
    anonymous_id  TEXT,
    state         TEXT NOT NULL DEFAULT 'anonymous',  -- 'anonymous' | 'identified'
    email         TEXT,
    first_name    TEXT,
    last_name     TEXT,
    properties    TEXT NOT NULL DEFAULT '{}',
    first_seen    TEXT NOT NULL,
    last_seen     TEXT NOT NULL,
    CHECK (state IN ('anonymous', 'identified'))
);

-- The device set of an identity. The composite key makes the set semantics
-- a storage-level guarantee.
CREATE TABLE IF NOT EXISTS identity_devices (
    identity_id  INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    device_id    TEXT NOT NULL,
    first_seen   TEXT NOT NULL,
    PRIMARY KEY (identity_id, device_id)
);

CREATE TABLE IF NOT EXISTS identity_mappings (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_user_id  TEXT NOT NULL,
    mapped_id          TEXT NOT NULL,
    mapping_type       TEXT NOT NULL,
    confidence_score   REAL NOT NULL DEFAULT 1.0,
    source             TEXT NOT NULL,
    events_stitched    INTEGER NOT NULL DEFAULT 0,
    first_seen         TEXT NOT NULL,
    last_seen          TEXT NOT NULL,
    UNIQUE (canonical_user_id, mapped_id, mapping_type),
    CHECK  (confidence_score BETWEEN 0.0 AND 1.0),
    CHECK  (events_stitched >= 0)
);

CREATE INDEX IF NOT EXISTS events_distinct_idx   ON events(distinct_id);
CREATE INDEX IF NOT EXISTS events_user_idx       ON events(user_id);
CREATE INDEX IF NOT EXISTS events_timestamp_idx  ON events(timestamp);
CREATE INDEX IF NOT EXISTS identities_anon_idx   ON identities(anonymous_id);
CREATE INDEX IF NOT EXISTS mappings_mapped_idx   ON identity_mappings(mapped_id, mapping_type);

PRAGMA user_version = 1;
";
