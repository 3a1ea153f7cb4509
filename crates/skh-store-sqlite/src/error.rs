//! Error type for `skh-store-sqlite`.

use skh_core::{Phase, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum label this version does not know.
  #[error("unknown {column} value: {value:?}")]
  UnknownLabel { column: &'static str, value: String },

  #[error("stored counter entry {key:?} is not an integer: {value:?}")]
  BadCounter { key: &'static str, value: String },
}

impl Error {
  /// Wrap into the core's storage error, tagged with the failing phase.
  pub fn into_core(self, phase: Phase) -> skh_core::Error {
    skh_core::Error::Storage { phase, source: StoreError::from(self) }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
