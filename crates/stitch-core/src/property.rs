//! Typed property bags.
//!
//! Client libraries send arbitrary JSON properties. They are kept as a tagged
//! union rather than raw `serde_json::Value` so the rest of the crate can match
//! on scalar kinds, while the untagged serde representation keeps the wire and
//! database form plain JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A property map, ordered by key so serialised output is stable.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Null,
  Bool(bool),
  /// Kept as a JSON number so integers round-trip without becoming floats.
  Number(serde_json::Number),
  String(String),
  List(Vec<PropertyValue>),
  Map(Properties),
}

impl PropertyValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Number(n) => n.as_f64(),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// Render a scalar identifier. Strings are returned as-is and numbers are
  /// stringified; everything else (including the empty string) is `None`.
  pub fn as_identifier(&self) -> Option<String> {
    match self {
      Self::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
      Self::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

impl From<&str> for PropertyValue {
  fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for PropertyValue {
  fn from(s: String) -> Self { Self::String(s) }
}

impl From<bool> for PropertyValue {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for PropertyValue {
  fn from(n: i64) -> Self { Self::Number(n.into()) }
}
