//! Wire decoding for the ingest boundary.
//!
//! A request carries a single base64-encoded JSON object in one of two
//! shapes:
//!
//! | Shape   | JSON                                               |
//! |---------|----------------------------------------------------|
//! | event   | `{"event": "...", "properties": {"distinct_id", "time", ...}}` |
//! | profile | `{"$distinct_id": "...", "$set": {...}}`           |

use base64::{
  Engine as _,
  engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use serde_json::{Map, Value};

use crate::{
  error::ValidationError,
  event::RawEvent,
  identity::ProfileFields,
  property::{Properties, PropertyValue},
};

/// A decoded, shape-classified payload.
#[derive(Debug, Clone)]
pub enum Payload {
  Event(RawEvent),
  Profile(ProfileUpdate),
}

/// A `$set` profile update for one distinct id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
  pub distinct_id: String,
  pub fields:      ProfileFields,
}

/// Decode base64 → JSON → [`Payload`].
pub fn decode(encoded: &str) -> Result<Payload, ValidationError> {
  let bytes = decode_base64(encoded)?;
  let value: Value = serde_json::from_slice(&bytes)?;
  let Value::Object(obj) = value else {
    return Err(ValidationError::NotAnObject);
  };

  let is_profile = !obj.contains_key("event")
    && (obj.contains_key("$distinct_id") || obj.contains_key("$set"));

  if is_profile {
    decode_profile(obj).map(Payload::Profile)
  } else {
    decode_event(obj).map(Payload::Event)
  }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, ValidationError> {
  // Form decoding turns `+` into a space; undo that before decoding.
  let cleaned: String = encoded
    .trim()
    .chars()
    .map(|c| if c == ' ' { '+' } else { c })
    .collect();

  let mut last_err = None;
  for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
    match engine.decode(&cleaned) {
      Ok(bytes) => return Ok(bytes),
      Err(e) => last_err = Some(e),
    }
  }
  Err(ValidationError::Encoding(
    last_err.map(|e| e.to_string()).unwrap_or_else(|| "empty payload".into()),
  ))
}

fn decode_event(mut obj: Map<String, Value>) -> Result<RawEvent, ValidationError> {
  let event = match obj.remove("event") {
    None | Some(Value::Null) => None,
    Some(Value::String(s)) => Some(s),
    Some(_) => {
      return Err(ValidationError::WrongType { field: "event", expected: "string" });
    }
  };

  let properties = match obj.remove("properties") {
    None | Some(Value::Null) => Properties::new(),
    Some(v @ Value::Object(_)) => serde_json::from_value(v)?,
    Some(_) => {
      return Err(ValidationError::WrongType {
        field:    "properties",
        expected: "object",
      });
    }
  };

  Ok(RawEvent { event, properties })
}

fn decode_profile(mut obj: Map<String, Value>) -> Result<ProfileUpdate, ValidationError> {
  let distinct_id = obj
    .remove("$distinct_id")
    .map(serde_json::from_value::<PropertyValue>)
    .transpose()?
    .and_then(|v| v.as_identifier())
    .ok_or(ValidationError::MissingField("$distinct_id"))?;

  let mut set: Properties = match obj.remove("$set") {
    None | Some(Value::Null) => Properties::new(),
    Some(v @ Value::Object(_)) => serde_json::from_value(v)?,
    Some(_) => {
      return Err(ValidationError::WrongType { field: "$set", expected: "object" });
    }
  };

  // Both spellings are removed from the custom properties; the `$` form wins.
  // A non-string value for a profile column is rejected rather than dropped.
  let mut take = |keys: [&'static str; 2]| -> Result<Option<String>, ValidationError> {
    let mut found = None;
    for key in keys {
      match set.remove(key) {
        None | Some(PropertyValue::Null) => {}
        Some(PropertyValue::String(s)) => {
          let s = s.trim();
          if found.is_none() && !s.is_empty() {
            found = Some(s.to_owned());
          }
        }
        Some(_) => {
          return Err(ValidationError::WrongType { field: key, expected: "string" });
        }
      }
    }
    Ok(found)
  };

  let email = take(["$email", "email"])?;
  let first_name = take(["$first_name", "first_name"])?;
  let last_name = take(["$last_name", "last_name"])?;

  Ok(ProfileUpdate {
    distinct_id,
    fields: ProfileFields { email, first_name, last_name, properties: set },
  })
}
