//! Configuration: an optional TOML file layered under `SKH_` environment
//! variables.
//!
//! ```toml
//! store_path      = "/var/lib/skh/skh.sqlite"
//! busy_timeout_ms = 5000
//!
//! [numbering]
//! number_format         = "SKH/%03d/%s/TUK.7.2.1/%d"
//! timezone              = "Asia/Jakarta"
//! archive_duration_days = 15
//! ```
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `SKH_NUMBERING__TIMEZONE=Asia/Makassar`.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use serde::Deserialize;
use skh_core::Settings;
use skh_store_sqlite::DEFAULT_BUSY_TIMEOUT;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_store_path")]
  pub store_path:      PathBuf,
  pub busy_timeout_ms: Option<u64>,
  #[serde(default)]
  pub numbering:       Settings,
}

fn default_store_path() -> PathBuf { PathBuf::from("skh.sqlite") }

impl AppConfig {
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(
        config::Environment::with_prefix("SKH")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("invalid configuration")
  }

  pub fn busy_timeout(&self) -> Duration {
    self
      .busy_timeout_ms
      .map_or(DEFAULT_BUSY_TIMEOUT, Duration::from_millis)
  }

  /// The store path with a leading `~/` expanded.
  pub fn store_path(&self) -> PathBuf {
    let s = self.store_path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }
}
