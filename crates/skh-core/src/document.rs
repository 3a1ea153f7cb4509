//! Document types: the numbered lost-property report and its loss items.
//!
//! A document's status is stored as [`DocumentStatus::Issued`] and never
//! rewritten; [`crate::status`] derives the archived view at read time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  person::{Person, PersonData, PersonId},
  user::{User, UserId},
};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Surrogate key of a document row. Ids increase in insertion order.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
  #[default]
  Issued,
  Archived,
}

impl DocumentStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Issued => "ISSUED",
      Self::Archived => "ARCHIVED",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "ISSUED" => Some(Self::Issued),
      "ARCHIVED" => Some(Self::Archived),
      _ => None,
    }
  }
}

// ─── Loss items ──────────────────────────────────────────────────────────────

/// A lost object listed on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossItem {
  pub item_id:     i64,
  pub name:        String,
  pub description: String,
}

/// A loss item as submitted by a caller, before it has a row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLossItem {
  pub name:        String,
  #[serde(default)]
  pub description: String,
}

impl NewLossItem {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self { name: name.into(), description: description.into() }
  }
}

// ─── Hydrated record ─────────────────────────────────────────────────────────

/// A document with every reference resolved, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
  pub document_id:       DocumentId,
  pub number:            String,
  pub reported_at:       DateTime<Utc>,
  pub status:            DocumentStatus,
  pub loss_location:     String,
  pub person:            Person,
  pub items:             Vec<LossItem>,
  pub reporting_officer: User,
  pub approving_officer: Option<User>,
  pub approved_at:       Option<DateTime<Utc>>,
  pub operator:          User,
  pub last_modified_by:  Option<User>,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Caller-supplied content of a document, used for both creation and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDraft {
  pub person:            PersonData,
  #[serde(default)]
  pub items:             Vec<NewLossItem>,
  #[serde(default)]
  pub loss_location:     String,
  pub reporting_officer: UserId,
  pub approving_officer: Option<UserId>,
}

impl DocumentDraft {
  /// Check the fields the store cannot check for us.
  pub fn validate(&self) -> Result<()> {
    self.person.validate()?;
    if self.items.iter().any(|item| item.name.trim().is_empty()) {
      return Err(Error::MissingField("item name"));
    }
    Ok(())
  }
}

// ─── Rows exchanged with the store ───────────────────────────────────────────

/// The parts of a live document needed to authorise and apply a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
  pub document_id: DocumentId,
  pub number:      String,
  pub person_id:   PersonId,
  pub operator:    UserId,
}

/// A fully-numbered document ready for insertion.
#[derive(Debug, Clone)]
pub struct NewDocument {
  pub number:            String,
  pub reported_at:       DateTime<Utc>,
  /// Calendar year of creation in the configured timezone.
  pub created_year:      i32,
  pub loss_location:     String,
  pub person_id:         PersonId,
  pub reporting_officer: UserId,
  pub approving_officer: Option<UserId>,
  pub approved_at:       Option<DateTime<Utc>>,
  pub operator:          UserId,
}

/// Field changes applied to an existing document on update. The number is
/// deliberately absent: documents are never renumbered.
#[derive(Debug, Clone)]
pub struct DocumentPatch {
  /// Changes only when the revised (name, birth date) belongs to another
  /// person.
  pub person_id:         PersonId,
  pub loss_location:     String,
  pub reporting_officer: UserId,
  pub approving_officer: Option<UserId>,
  pub last_modified_by:  UserId,
  pub updated_at:        DateTime<Utc>,
}
