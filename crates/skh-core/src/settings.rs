//! Registry settings: number format, timezone, and retention window.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, numbering::NumberFormat};

/// Validated settings consumed by the [`crate::registry::Registry`].
///
/// Deserialises from the plain form:
///
/// ```toml
/// number_format         = "SKH/%03d/%s/TUK.7.2.1/%d"
/// timezone              = "Asia/Jakarta"
/// archive_duration_days = 15
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSettings", into = "RawSettings")]
pub struct Settings {
  pub number_format:         NumberFormat,
  /// Zone in which "now" is read for numbering (year and month).
  pub timezone:              Tz,
  /// Zero or `None` means the default window.
  pub archive_duration_days: Option<u32>,
}

impl Settings {
  pub fn new(
    number_format: &str,
    timezone: &str,
    archive_duration_days: Option<u32>,
  ) -> Result<Self> {
    Ok(Self {
      number_format: NumberFormat::parse(number_format)?,
      timezone: parse_timezone(timezone)?,
      archive_duration_days,
    })
  }

  /// `now` in the configured timezone.
  pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
    now.with_timezone(&self.timezone)
  }
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      number_format:         NumberFormat::default(),
      timezone:              Tz::UTC,
      archive_duration_days: None,
    }
  }
}

fn parse_timezone(name: &str) -> Result<Tz> {
  let name = name.trim();
  if name.is_empty() {
    return Ok(Tz::UTC);
  }
  name
    .parse()
    .map_err(|_| Error::InvalidTimezone(name.to_owned()))
}

// ─── Serde form ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSettings {
  #[serde(default = "default_number_format")]
  number_format:         String,
  #[serde(default)]
  timezone:              String,
  #[serde(default)]
  archive_duration_days: Option<u32>,
}

fn default_number_format() -> String {
  crate::numbering::DEFAULT_NUMBER_FORMAT.to_owned()
}

impl TryFrom<RawSettings> for Settings {
  type Error = Error;

  fn try_from(raw: RawSettings) -> Result<Self> {
    Self::new(&raw.number_format, &raw.timezone, raw.archive_duration_days)
  }
}

impl From<Settings> for RawSettings {
  fn from(s: Settings) -> Self {
    Self {
      number_format:         s.number_format.into(),
      timezone:              s.timezone.name().to_owned(),
      archive_duration_days: s.archive_duration_days,
    }
  }
}
