//! Core types and trait definitions for the identity-stitching event
//! pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod error;
pub mod event;
pub mod identity;
pub mod ingest;
pub mod normalize;
pub mod payload;
pub mod property;
pub mod store;

pub use error::{Error, Result, ValidationError};
