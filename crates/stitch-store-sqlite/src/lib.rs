//! SQLite backend for the identity-stitching event store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Each public operation is one
//! transaction over the modules below, which only ever see a borrowed
//! [`rusqlite::Transaction`].

mod coordinator;
mod encode;
mod events;
mod identity;
mod ledger;
mod schema;
mod stitch;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
