//! Status projection. The archived view of a document is computed at read
//! time and never persisted.

use chrono::{DateTime, Duration, Utc};

use crate::document::{DocumentRecord, DocumentStatus};

/// Retention window used when none (or zero) is configured.
pub const DEFAULT_ARCHIVE_DAYS: u32 = 15;

/// Days before archival within which a document counts as expiring.
pub const EXPIRY_NOTICE_DAYS: i64 = 3;

/// The effective retention window.
pub fn archive_window(archive_days: Option<u32>) -> Duration {
  let days = archive_days.filter(|d| *d > 0).unwrap_or(DEFAULT_ARCHIVE_DAYS);
  Duration::days(i64::from(days))
}

/// Documents reported before this instant are archived as of `now`.
pub fn archive_cutoff(now: DateTime<Utc>, archive_days: Option<u32>) -> DateTime<Utc> {
  now - archive_window(archive_days)
}

/// An issued document reads as archived once `now` is past its report time
/// plus the retention window.
pub fn project(
  stored: DocumentStatus,
  reported_at: DateTime<Utc>,
  now: DateTime<Utc>,
  archive_days: Option<u32>,
) -> DocumentStatus {
  match stored {
    DocumentStatus::Issued if now > reported_at + archive_window(archive_days) => {
      DocumentStatus::Archived
    }
    other => other,
  }
}

impl DocumentRecord {
  /// Replace the stored status with its projection.
  pub fn projected(mut self, now: DateTime<Utc>, archive_days: Option<u32>) -> Self {
    self.status = project(self.status, self.reported_at, now, archive_days);
    self
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn reported() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
  }

  #[test]
  fn fresh_document_stays_issued() {
    let now = reported() + Duration::days(3);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), now, Some(15)),
      DocumentStatus::Issued
    );
  }

  #[test]
  fn archived_after_window() {
    let now = reported() + Duration::days(16);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), now, Some(15)),
      DocumentStatus::Archived
    );
  }

  #[test]
  fn exact_boundary_is_not_yet_archived() {
    let now = reported() + Duration::days(15);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), now, Some(15)),
      DocumentStatus::Issued
    );
    let later = now + Duration::seconds(1);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), later, Some(15)),
      DocumentStatus::Archived
    );
  }

  #[test]
  fn zero_or_unset_window_falls_back_to_default() {
    let now = reported() + Duration::days(10);
    for days in [None, Some(0)] {
      assert_eq!(
        project(DocumentStatus::Issued, reported(), now, days),
        DocumentStatus::Issued
      );
    }
    let now = reported() + Duration::days(16);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), now, Some(0)),
      DocumentStatus::Archived
    );
  }

  #[test]
  fn projection_is_repeatable() {
    let now = reported() + Duration::days(20);
    let a = project(DocumentStatus::Issued, reported(), now, Some(30));
    let b = project(DocumentStatus::Issued, reported(), now, Some(30));
    assert_eq!(a, b);
    assert_eq!(a, DocumentStatus::Issued);
    assert_eq!(
      project(DocumentStatus::Issued, reported(), now, Some(7)),
      DocumentStatus::Archived
    );
  }

  #[test]
  fn cutoff_agrees_with_projection() {
    let now = reported() + Duration::days(40);
    let cutoff = archive_cutoff(now, Some(15));
    let just_before = cutoff - Duration::seconds(1);
    assert_eq!(
      project(DocumentStatus::Issued, just_before, now, Some(15)),
      DocumentStatus::Archived
    );
    assert_eq!(
      project(DocumentStatus::Issued, cutoff, now, Some(15)),
      DocumentStatus::Issued
    );
  }
}
