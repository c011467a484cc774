//! Event normalisation: raw wire event → [`CanonicalEvent`].
//!
//! Pure functions only. Every rule here (keyword priority, platform
//! precedence, reserved keys) must resolve identically for every event shape,
//! so the lists are defined once as constants.

use chrono::{DateTime, Datelike as _, Utc};

use crate::{
  error::ValidationError,
  event::{CanonicalEvent, EventCategory, Platform, RawEvent},
  property::{Properties, PropertyValue},
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// System keys stripped from every stored event's properties.
pub const RESERVED_PROPERTIES: &[&str] = &[
  // tokens
  "token",
  "$token",
  // identity
  "distinct_id",
  "$distinct_id",
  "$anon_distinct_id",
  "$identified_id",
  "$user_id",
  "$device_id",
  // timing
  "time",
  // OS / browser / device
  "$os",
  "$os_version",
  "$browser",
  "$browser_version",
  "$device",
  "$device_type",
  "$model",
  // country
  "$country_code",
  "mp_country_code",
  "country_code",
  "$geo_country",
];

/// Property keys searched, in order, for a country code.
pub const COUNTRY_KEYS: &[&str] =
  &["$country_code", "mp_country_code", "country_code", "$geo_country"];

/// Keyword sets in priority order. The first category with a keyword that
/// appears in the lowercased event name wins.
const CATEGORY_KEYWORDS: &[(EventCategory, &[&str])] = &[
  (EventCategory::Fitness, &[
    "workout", "exercise", "fitness", "training", "run", "gym", "yoga",
    "cardio", "steps", "calorie",
  ]),
  (EventCategory::Ecommerce, &[
    "purchase", "cart", "checkout", "order", "payment", "product", "buy",
    "subscription", "refund",
  ]),
  (EventCategory::Navigation, &[
    "page", "view", "screen", "click", "navigate", "scroll", "tab", "link",
  ]),
  (EventCategory::Error, &[
    "error", "fail", "exception", "crash", "timeout",
  ]),
  (EventCategory::UserLifecycle, &[
    "signup", "sign up", "sign_up", "login", "log in", "logout", "log out",
    "register", "onboard", "identify", "profile", "account",
  ]),
];

/// Epoch values above this are taken to be milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Latest year an event time may fall in.
const MAX_YEAR: i32 = 9999;

// ─── Normalise ───────────────────────────────────────────────────────────────

/// Validate and normalise a raw event.
pub fn normalize(raw: &RawEvent) -> Result<CanonicalEvent, ValidationError> {
  let event_name = raw
    .event
    .as_deref()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .ok_or(ValidationError::MissingField("event"))?
    .to_owned();

  let props = &raw.properties;

  let distinct_id = props
    .get("distinct_id")
    .and_then(PropertyValue::as_identifier)
    .ok_or(ValidationError::MissingField("distinct_id"))?;

  let timestamp = parse_time(props.get("time"))?;

  Ok(CanonicalEvent {
    category: categorize(&event_name),
    event_name,
    event_detail: string_prop(props, "event_detail"),
    distinct_id,
    session_id: string_prop(props, "$session_id"),
    platform: derive_platform(props),
    country_code: extract_country(props),
    timestamp,
    properties: sanitize(props),
  })
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// Categorise an event name by keyword, in fixed priority order.
pub fn categorize(event_name: &str) -> EventCategory {
  let name = event_name.to_lowercase();
  CATEGORY_KEYWORDS
    .iter()
    .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
    .map(|(category, _)| *category)
    .unwrap_or_default()
}

/// Derive the capturing platform from OS, browser and source hints.
pub fn derive_platform(props: &Properties) -> Platform {
  let browser = props
    .get("$browser")
    .and_then(PropertyValue::as_str)
    .is_some_and(|b| !b.trim().is_empty());

  if let Some(os) = props.get("$os").and_then(PropertyValue::as_str) {
    match classify_os(os) {
      Some(OsFamily::Mobile) => return Platform::Mobile,
      Some(OsFamily::Desktop) if browser => return Platform::Web,
      Some(OsFamily::Desktop) => return Platform::Desktop,
      None => {}
    }
  }

  if browser {
    return Platform::Web;
  }

  let from_server = props
    .get("$source")
    .and_then(PropertyValue::as_str)
    .is_some_and(|s| s.eq_ignore_ascii_case("server"));
  if from_server {
    return Platform::Server;
  }

  Platform::Unknown
}

enum OsFamily {
  Mobile,
  Desktop,
}

fn classify_os(os: &str) -> Option<OsFamily> {
  let os = os.trim().to_lowercase();
  if os == "ios"
    || os == "ipados"
    || os.starts_with("ios ")
    || os.starts_with("iphone")
    || os.starts_with("android")
  {
    return Some(OsFamily::Mobile);
  }
  const DESKTOP: &[&str] =
    &["windows", "mac os", "macos", "linux", "chrome os", "ubuntu"];
  if DESKTOP.iter().any(|d| os.starts_with(d)) {
    return Some(OsFamily::Desktop);
  }
  None
}

/// The first usable two-letter country code among [`COUNTRY_KEYS`].
pub fn extract_country(props: &Properties) -> Option<String> {
  COUNTRY_KEYS
    .iter()
    .filter_map(|k| props.get(*k).and_then(PropertyValue::as_str))
    .map(str::trim)
    .find(|code| code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
    .map(str::to_ascii_uppercase)
}

/// Copy `props` without any of the [`RESERVED_PROPERTIES`].
pub fn sanitize(props: &Properties) -> Properties {
  props
    .iter()
    .filter(|(k, _)| !RESERVED_PROPERTIES.contains(&k.as_str()))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}

fn string_prop(props: &Properties, key: &str) -> Option<String> {
  props
    .get(key)
    .and_then(PropertyValue::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
}

fn parse_time(value: Option<&PropertyValue>) -> Result<DateTime<Utc>, ValidationError> {
  let value = value.ok_or(ValidationError::MissingField("time"))?;
  let raw = value
    .as_f64()
    .ok_or_else(|| ValidationError::InvalidTime(format!("not a number: {value:?}")))?;

  if !raw.is_finite() || raw < 0.0 {
    return Err(ValidationError::InvalidTime(format!("out of range: {raw}")));
  }

  // Work in whole microseconds so float noise never leaks into the stored
  // timestamp.
  let micros = if raw > MILLIS_THRESHOLD {
    (raw.round() as i64).saturating_mul(1_000)
  } else {
    (raw * 1e6).round() as i64
  };

  DateTime::from_timestamp(
    micros.div_euclid(1_000_000),
    (micros.rem_euclid(1_000_000) * 1_000) as u32,
  )
  // Stored timestamps are fixed-width RFC 3339, which stops at year 9999.
  .filter(|dt| dt.year() <= MAX_YEAR)
  .ok_or_else(|| ValidationError::InvalidTime(format!("out of range: {raw}")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
