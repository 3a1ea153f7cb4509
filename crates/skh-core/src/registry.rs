//! The registry coordinator: issues, revises and deletes documents, and serves
//! the read views.
//!
//! Creation is serialised twice. The registry's issue guard orders creators
//! within the process, and the store's transaction lock orders them across
//! connections and processes. Person resolution and number allocation both run
//! inside that one transaction, so a failure anywhere leaves no trace.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
  Error, Phase, Result,
  audit::{AuditAction, AuditEmitter, AuditEntry, AuditSink, PendingWrites},
  clock::{Clock, SystemClock},
  document::{
    DocumentDraft, DocumentHeader, DocumentId, DocumentPatch, DocumentRecord,
    NewDocument,
  },
  numbering,
  person,
  settings::Settings,
  status::{EXPIRY_NOTICE_DAYS, archive_cutoff},
  store::{DocumentQuery, LedgerStore, LedgerTx},
  user::{Role, User, UserId},
};

/// Default and maximum result count for [`Registry::search`].
const SEARCH_LIMIT_DEFAULT: usize = 50;
const SEARCH_LIMIT_MAX: usize = 100;

/// Default and maximum page length for [`Registry::page`].
const PAGE_LENGTH_DEFAULT: usize = 10;
const PAGE_LENGTH_MAX: usize = 100;

// ─── Read-side request types ─────────────────────────────────────────────────

/// Which documents a listing keeps, judged by their projected status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
  /// Still within the retention window.
  #[default]
  Active,
  /// Past the retention window.
  Archived,
  All,
}

impl StatusFilter {
  fn apply(self, query: &mut DocumentQuery, cutoff: DateTime<Utc>) {
    match self {
      Self::Active => query.reported_from = Some(cutoff),
      Self::Archived => query.reported_before = Some(cutoff),
      Self::All => {}
    }
  }
}

/// A paged listing request in the shape of a data-table widget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
  pub start:         usize,
  pub length:        Option<usize>,
  pub search:        Option<String>,
  /// Keep only documents archiving within the notice window.
  pub expiring_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
  /// Documents passing the status filter.
  pub total:    u64,
  /// Documents also passing the search and expiry filters.
  pub filtered: u64,
  pub records:  Vec<DocumentRecord>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

pub struct Registry<S, C = SystemClock> {
  store:      Arc<S>,
  clock:      C,
  settings:   RwLock<Arc<Settings>>,
  audit:      AuditEmitter<S>,
  issue_lock: Mutex<()>,
}

impl<S: LedgerStore + AuditSink> Registry<S> {
  pub fn new(store: S, settings: Settings) -> Self {
    Self::with_clock(store, settings, SystemClock)
  }
}

impl<S: LedgerStore + AuditSink, C: Clock> Registry<S, C> {
  pub fn with_clock(store: S, settings: Settings, clock: C) -> Self {
    let store = Arc::new(store);
    Self {
      audit: AuditEmitter::new(Arc::clone(&store)),
      store,
      clock,
      settings: RwLock::new(Arc::new(settings)),
      issue_lock: Mutex::new(()),
    }
  }

  /// Count audit writes in `pending` so callers can wait for them.
  pub fn with_audit_tracker(mut self, pending: Arc<PendingWrites>) -> Self {
    self.audit = self.audit.with_tracker(pending);
    self
  }

  pub fn store(&self) -> &S { &self.store }

  /// The settings in force. Operations read them once at their start.
  pub fn settings(&self) -> Arc<Settings> {
    Arc::clone(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
  }

  pub fn replace_settings(&self, settings: Settings) {
    *self.settings.write().unwrap_or_else(PoisonError::into_inner) =
      Arc::new(settings);
    info!("registry settings replaced");
  }

  // ── Mutations ─────────────────────────────────────────────────────────

  /// Issue a new document for `draft`, operated by `actor`.
  pub async fn create(
    &self,
    actor: UserId,
    draft: DocumentDraft,
  ) -> Result<DocumentRecord> {
    draft.validate()?;
    let settings = self.settings();

    let guard = self.issue_lock.lock().await;
    debug!("issue guard acquired");

    let now = self.clock.now();
    let local = settings.local(now);
    let (year, month) = (local.year(), local.month());
    let format = settings.number_format.clone();

    let (document_id, number) = self
      .store
      .transact(move |tx| {
        let person_id = person::resolve(&mut *tx, &draft.person, now)?;
        let allocation = numbering::allocate(&mut *tx, &format, year, month)?;

        require_user(tx, actor, Phase::Insertion)?;
        require_user(tx, draft.reporting_officer, Phase::Insertion)?;
        if let Some(approver) = draft.approving_officer {
          require_user(tx, approver, Phase::Insertion)?;
        }

        let document = NewDocument {
          number: allocation.number,
          reported_at: now,
          created_year: year,
          loss_location: draft.loss_location,
          person_id,
          reporting_officer: draft.reporting_officer,
          approving_officer: draft.approving_officer,
          approved_at: draft.approving_officer.map(|_| now),
          operator: actor,
        };
        let id = tx
          .insert_document(&document)
          .map_err(Error::storage(Phase::Insertion))?;
        tx.insert_items(id, &draft.items)
          .map_err(Error::storage(Phase::Insertion))?;
        Ok((id, document.number))
      })
      .await?;
    drop(guard);

    info!(document = %document_id, %number, %actor, "document issued");
    self.audit.emit(AuditEntry::new(
      actor,
      AuditAction::CreateDocument,
      format!("issued {number}"),
      now,
    ));

    self.fetch(document_id, now, &settings).await
  }

  /// Revise a live document. The number never changes; the loss items are
  /// replaced wholesale.
  pub async fn update(
    &self,
    actor: UserId,
    document_id: DocumentId,
    draft: DocumentDraft,
  ) -> Result<DocumentRecord> {
    let settings = self.settings();
    let now = self.clock.now();

    let number = self
      .store
      .transact(move |tx| {
        let header = live_header(tx, document_id, Phase::Update)?;
        let user = tx.get_user(actor).map_err(Error::storage(Phase::Update))?;
        authorize(user.as_ref(), actor, document_id, header.operator)?;
        draft.validate()?;

        require_user(tx, draft.reporting_officer, Phase::Update)?;
        if let Some(approver) = draft.approving_officer {
          require_user(tx, approver, Phase::Update)?;
        }

        let current = tx
          .get_person(header.person_id)
          .map_err(Error::storage(Phase::Update))?
          .ok_or_else(|| dangling_person(&header))?;
        let person = person::revise(&mut *tx, current, &draft.person, now)?;

        tx.delete_items(document_id)
          .map_err(Error::storage(Phase::Update))?;
        tx.insert_items(document_id, &draft.items)
          .map_err(Error::storage(Phase::Update))?;

        let patch = DocumentPatch {
          person_id: person.person_id,
          loss_location: draft.loss_location,
          reporting_officer: draft.reporting_officer,
          approving_officer: draft.approving_officer,
          last_modified_by: actor,
          updated_at: now,
        };
        tx.update_document(document_id, &patch)
          .map_err(Error::storage(Phase::Update))?;
        Ok(header.number)
      })
      .await?;

    info!(document = %document_id, %number, %actor, "document updated");
    self.audit.emit(AuditEntry::new(
      actor,
      AuditAction::UpdateDocument,
      format!("updated {number}"),
      now,
    ));

    self.fetch(document_id, now, &settings).await
  }

  /// Soft-delete a live document. Its number is rewritten so the original
  /// value is free for reuse.
  pub async fn delete(&self, actor: UserId, document_id: DocumentId) -> Result<()> {
    let now = self.clock.now();

    let number = self
      .store
      .transact(move |tx| {
        let header = live_header(tx, document_id, Phase::Deletion)?;
        let user = tx.get_user(actor).map_err(Error::storage(Phase::Deletion))?;
        authorize(user.as_ref(), actor, document_id, header.operator)?;

        tx.rename_document(document_id, &deleted_number(now, &header.number))
          .map_err(Error::storage(Phase::Deletion))?;
        tx.soft_delete_document(document_id, now)
          .map_err(Error::storage(Phase::Deletion))?;
        Ok(header.number)
      })
      .await?;

    info!(document = %document_id, %number, %actor, "document deleted");
    self.audit.emit(AuditEntry::new(
      actor,
      AuditAction::DeleteDocument,
      format!("deleted {number}"),
      now,
    ));
    Ok(())
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// A single document, visible to its operator and to super admins.
  pub async fn get(
    &self,
    document_id: DocumentId,
    actor: UserId,
  ) -> Result<DocumentRecord> {
    let settings = self.settings();
    let now = self.clock.now();
    let record = self.fetch(document_id, now, &settings).await?;
    let user = self.store.get_user(actor).await?;
    authorize(user.as_ref(), actor, document_id, record.operator.user_id)?;
    Ok(record)
  }

  /// Every live document, newest report first.
  pub async fn list(
    &self,
    text: Option<&str>,
    filter: StatusFilter,
  ) -> Result<Vec<DocumentRecord>> {
    let settings = self.settings();
    let now = self.clock.now();
    let mut query = DocumentQuery { text: non_blank(text), ..DocumentQuery::default() };
    filter.apply(&mut query, archive_cutoff(now, settings.archive_duration_days));
    self.project_all(&query, now, &settings).await
  }

  /// Text search over number and person name, newest first.
  pub async fn search(
    &self,
    text: &str,
    limit: Option<usize>,
  ) -> Result<Vec<DocumentRecord>> {
    let settings = self.settings();
    let now = self.clock.now();
    let query = DocumentQuery {
      text: non_blank(Some(text)),
      limit: Some(clamp_limit(limit, SEARCH_LIMIT_DEFAULT, SEARCH_LIMIT_MAX)),
      ..DocumentQuery::default()
    };
    self.project_all(&query, now, &settings).await
  }

  /// One page of documents with the totals a data table needs.
  pub async fn page(
    &self,
    request: PageRequest,
    filter: StatusFilter,
    actor: UserId,
  ) -> Result<Page> {
    let settings = self.settings();
    let now = self.clock.now();
    let cutoff = archive_cutoff(now, settings.archive_duration_days);

    let mut base = DocumentQuery::default();
    filter.apply(&mut base, cutoff);
    let total = self.store.count_documents(&base).await?;

    let mut query = DocumentQuery {
      text: non_blank(request.search.as_deref()),
      ..base
    };
    if request.expiring_only {
      let user = self
        .store
        .get_user(actor)
        .await?
        .ok_or(Error::UnknownUser(actor))?;
      restrict_to_expiring(&mut query, cutoff);
      if user.role != Role::SuperAdmin {
        query.operator = Some(actor);
      }
      query.oldest_first = true;
    }
    let filtered = self.store.count_documents(&query).await?;

    query.limit =
      Some(clamp_limit(request.length, PAGE_LENGTH_DEFAULT, PAGE_LENGTH_MAX));
    query.offset = Some(request.start);
    let records = self.project_all(&query, now, &settings).await?;

    Ok(Page { total, filtered, records })
  }

  /// Most recent audit entries first.
  pub async fn audit_trail(&self, limit: usize) -> Result<Vec<AuditEntry>> {
    self.store.audit_entries(limit).await
  }

  // ── Helpers ───────────────────────────────────────────────────────────

  async fn fetch(
    &self,
    document_id: DocumentId,
    now: DateTime<Utc>,
    settings: &Settings,
  ) -> Result<DocumentRecord> {
    self
      .store
      .get_document(document_id)
      .await?
      .map(|record| record.projected(now, settings.archive_duration_days))
      .ok_or(Error::DocumentNotFound(document_id))
  }

  async fn project_all(
    &self,
    query: &DocumentQuery,
    now: DateTime<Utc>,
    settings: &Settings,
  ) -> Result<Vec<DocumentRecord>> {
    let records = self.store.list_documents(query).await?;
    Ok(
      records
        .into_iter()
        .map(|record| record.projected(now, settings.archive_duration_days))
        .collect(),
    )
  }
}

// ─── Free helpers ────────────────────────────────────────────────────────────

fn require_user(tx: &mut dyn LedgerTx, id: UserId, phase: Phase) -> Result<User> {
  tx.get_user(id)
    .map_err(Error::storage(phase))?
    .ok_or(Error::UnknownUser(id))
}

fn live_header(
  tx: &mut dyn LedgerTx,
  document_id: DocumentId,
  phase: Phase,
) -> Result<DocumentHeader> {
  tx.live_document(document_id)
    .map_err(Error::storage(phase))?
    .ok_or(Error::DocumentNotFound(document_id))
}

/// Unknown actors are denied like any other non-owner.
fn authorize(
  user: Option<&User>,
  actor: UserId,
  document: DocumentId,
  operator: UserId,
) -> Result<()> {
  match user {
    Some(user) if user.may_manage(operator) => Ok(()),
    _ => Err(Error::AccessDenied { actor, document }),
  }
}

fn dangling_person(header: &DocumentHeader) -> Error {
  Error::Storage {
    phase:  Phase::Update,
    source: format!(
      "document {} references missing person {}",
      header.document_id, header.person_id
    )
    .into(),
  }
}

/// The number a soft-deleted document is renamed to.
pub fn deleted_number(at: DateTime<Utc>, number: &str) -> String {
  format!("DELETED_{}_{number}", at.timestamp())
}

fn restrict_to_expiring(query: &mut DocumentQuery, cutoff: DateTime<Utc>) {
  let notice_end = cutoff + Duration::days(EXPIRY_NOTICE_DAYS);
  query.reported_from = Some(query.reported_from.map_or(cutoff, |f| f.max(cutoff)));
  query.reported_before =
    Some(query.reported_before.map_or(notice_end, |b| b.min(notice_end)));
}

fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
  match requested {
    Some(0) | None => default,
    Some(n) => n.min(max),
  }
}

fn non_blank(text: Option<&str>) -> Option<String> {
  text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use chrono::{NaiveDate, TimeZone};

  use super::*;
  use crate::{
    clock::ManualClock,
    document::NewLossItem,
    person::PersonData,
    store::memory::MemoryLedger,
  };

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() }

  fn operator() -> User {
    User {
      user_id:             UserId(1),
      full_name:           "Operator Satu".into(),
      registration_number: "80010001".into(),
      rank:                None,
      position:            None,
      role:                Role::Operator,
      created_at:          now(),
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn issue_guard_keeps_lockless_creates_apart() {
    let op = operator();
    let settings = Settings::new("SKH/%03d/%s/%d", "UTC", Some(15)).unwrap();
    let registry = Arc::new(Registry::with_clock(
      MemoryLedger::with_users(vec![op.clone()]),
      settings,
      ManualClock::new(now()),
    ));

    let tasks: Vec<_> = (0..16)
      .map(|i| {
        let registry = Arc::clone(&registry);
        let actor = op.user_id;
        tokio::spawn(async move {
          let draft = DocumentDraft {
            person:            PersonData::new(
              format!("Warga {i}"),
              NaiveDate::from_ymd_opt(1990, 4, 12).unwrap(),
            ),
            items:             vec![NewLossItem::new("KTP", "")],
            loss_location:     "Pasar Minggu".into(),
            reporting_officer: actor,
            approving_officer: None,
          };
          registry.create(actor, draft).await.map(|rec| rec.number)
        })
      })
      .collect();

    let mut numbers = Vec::new();
    for task in tasks {
      numbers.push(task.await.unwrap().unwrap());
    }

    let unique: HashSet<_> = numbers.iter().collect();
    assert_eq!(unique.len(), 16);
    let mut running: Vec<u32> = numbers
      .iter()
      .filter_map(|n| numbering::parse_running_number(n))
      .collect();
    running.sort_unstable();
    assert_eq!(running, (1..=16).collect::<Vec<_>>());
  }

  #[test]
  fn limits_default_and_cap() {
    assert_eq!(clamp_limit(None, 50, 100), 50);
    assert_eq!(clamp_limit(Some(0), 50, 100), 50);
    assert_eq!(clamp_limit(Some(20), 50, 100), 20);
    assert_eq!(clamp_limit(Some(500), 10, 100), 100);
  }

  #[test]
  fn deleted_number_embeds_seconds_and_original() {
    let at = Utc.timestamp_opt(1_736_152_200, 999).unwrap();
    assert_eq!(
      deleted_number(at, "SKH/001/I/2025"),
      "DELETED_1736152200_SKH/001/I/2025"
    );
    // The running number stays at the same field position.
    assert_eq!(
      numbering::parse_running_number(&deleted_number(at, "SKH/007/I/2025")),
      Some(7)
    );
  }

  #[test]
  fn status_filters_split_on_cutoff() {
    let cutoff = archive_cutoff(now(), Some(15));

    let mut active = DocumentQuery::default();
    StatusFilter::Active.apply(&mut active, cutoff);
    assert_eq!(active.reported_from, Some(cutoff));
    assert_eq!(active.reported_before, None);

    let mut archived = DocumentQuery::default();
    StatusFilter::Archived.apply(&mut archived, cutoff);
    assert_eq!(archived.reported_before, Some(cutoff));
    assert_eq!(archived.reported_from, None);
  }

  #[test]
  fn expiring_window_intersects_status_filter() {
    let cutoff = archive_cutoff(now(), Some(15));

    let mut active = DocumentQuery::default();
    StatusFilter::Active.apply(&mut active, cutoff);
    restrict_to_expiring(&mut active, cutoff);
    assert_eq!(active.reported_from, Some(cutoff));
    assert_eq!(active.reported_before, Some(cutoff + Duration::days(3)));

    // Archived documents can never be expiring: the range is empty.
    let mut archived = DocumentQuery::default();
    StatusFilter::Archived.apply(&mut archived, cutoff);
    restrict_to_expiring(&mut archived, cutoff);
    assert_eq!(archived.reported_from, archived.reported_before);
  }

  #[test]
  fn unknown_actor_is_denied() {
    let err = authorize(None, UserId(9), DocumentId(1), UserId(9)).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));
  }

  #[test]
  fn blank_text_is_no_filter() {
    assert_eq!(non_blank(Some("   ")), None);
    assert_eq!(non_blank(Some(" Budi ")), Some("Budi".to_owned()));
  }
}
