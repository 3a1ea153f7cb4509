//! Error types for `skh-core`.

use std::fmt;

use thiserror::Error;

use crate::{document::DocumentId, user::UserId};

/// Opaque error raised by a storage backend. Backends box their native error
/// so the core never depends on a particular database crate.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The step of a registry operation that hit a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  PersonResolution,
  Numbering,
  Insertion,
  Update,
  Deletion,
  Read,
  Transaction,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::PersonResolution => "person resolution",
      Self::Numbering => "document numbering",
      Self::Insertion => "document insertion",
      Self::Update => "document update",
      Self::Deletion => "document deletion",
      Self::Read => "document read",
      Self::Transaction => "transaction",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("user {actor} may not access document {document}")]
  AccessDenied { actor: UserId, document: DocumentId },

  #[error("document not found: {0}")]
  DocumentNotFound(DocumentId),

  #[error("unknown user: {0}")]
  UnknownUser(UserId),

  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("identifier {0:?} already belongs to another person")]
  IdentifierTaken(String),

  #[error("month index out of range: {0}")]
  InvalidMonth(u32),

  #[error("invalid number format {format:?}: {reason}")]
  InvalidFormat { format: String, reason: String },

  #[error("unknown timezone {0:?}")]
  InvalidTimezone(String),

  #[error("no free placeholder identifier after {0} attempts")]
  PlaceholderExhausted(usize),

  #[error("{phase} failed")]
  Storage {
    phase:  Phase,
    #[source]
    source: StoreError,
  },
}

/// Coarse classification callers use to map errors onto their own surface
/// (e.g. HTTP 403 / 404 / 422 / 500).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  AccessDenied,
  NotFound,
  Validation,
  Storage,
}

impl Error {
  /// Adapter for `map_err` that tags a backend error with the phase it
  /// occurred in.
  pub fn storage(phase: Phase) -> impl FnOnce(StoreError) -> Self {
    move |source| Self::Storage { phase, source }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::AccessDenied { .. } => ErrorKind::AccessDenied,
      Self::DocumentNotFound(_) => ErrorKind::NotFound,
      Self::UnknownUser(_)
      | Self::MissingField(_)
      | Self::IdentifierTaken(_)
      | Self::InvalidMonth(_)
      | Self::InvalidFormat { .. }
      | Self::InvalidTimezone(_)
      | Self::PlaceholderExhausted(_) => ErrorKind::Validation,
      Self::Storage { .. } => ErrorKind::Storage,
    }
  }

  /// The failing phase, for storage errors.
  pub fn phase(&self) -> Option<Phase> {
    match self {
      Self::Storage { phase, .. } => Some(*phase),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
