//! The persistence boundary: transactional write traits, the `LedgerStore`
//! trait, and supporting query types.
//!
//! Storage backends (e.g. `skh-store-sqlite`) implement these traits. The
//! [`crate::registry::Registry`] depends only on this abstraction.
//!
//! Writes happen through [`LedgerStore::transact`], which hands a
//! [`LedgerTx`] to a closure. The closure's steps either all commit or all
//! roll back. Backends must acquire their pessimistic lock before the closure
//! runs, so a concurrent transaction on another connection blocks instead of
//! reading a stale counter.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
  Result,
  StoreError,
  audit::AuditEntry,
  document::{DocumentHeader, DocumentId, DocumentPatch, DocumentRecord, NewDocument, NewLossItem},
  numbering::Counter,
  person::{NewPerson, Person, PersonId},
  user::{NewUser, User, UserId},
};

// ─── Transaction traits ──────────────────────────────────────────────────────

/// Access to the sequence state: the persisted counter and the record table.
pub trait SequenceTx {
  /// The number of the most recently inserted document created in `year`,
  /// soft-deleted rows included.
  fn latest_number_in_year(
    &mut self,
    year: i32,
  ) -> Result<Option<String>, StoreError>;

  /// Read the counter under the transaction's lock. Missing entries read as
  /// zero.
  fn lock_counter(&mut self) -> Result<Counter, StoreError>;

  fn store_counter(&mut self, counter: Counter) -> Result<(), StoreError>;
}

/// Person lookups and writes.
pub trait PersonTx {
  /// Exact match on the deduplication key.
  fn find_person_by_key(
    &mut self,
    full_name: &str,
    birth_date: NaiveDate,
  ) -> Result<Option<Person>, StoreError>;

  fn get_person(&mut self, id: PersonId) -> Result<Option<Person>, StoreError>;

  fn identifier_taken(&mut self, identifier: &str) -> Result<bool, StoreError>;

  fn insert_person(
    &mut self,
    person: &NewPerson,
    at: DateTime<Utc>,
  ) -> Result<PersonId, StoreError>;

  fn update_person(&mut self, person: &Person) -> Result<(), StoreError>;
}

/// Document and user access inside a transaction.
pub trait DocumentTx {
  fn get_user(&mut self, id: UserId) -> Result<Option<User>, StoreError>;

  /// A document that has not been soft-deleted.
  fn live_document(
    &mut self,
    id: DocumentId,
  ) -> Result<Option<DocumentHeader>, StoreError>;

  fn insert_document(
    &mut self,
    document: &NewDocument,
  ) -> Result<DocumentId, StoreError>;

  fn insert_items(
    &mut self,
    id: DocumentId,
    items: &[NewLossItem],
  ) -> Result<(), StoreError>;

  fn delete_items(&mut self, id: DocumentId) -> Result<(), StoreError>;

  fn update_document(
    &mut self,
    id: DocumentId,
    patch: &DocumentPatch,
  ) -> Result<(), StoreError>;

  fn rename_document(
    &mut self,
    id: DocumentId,
    number: &str,
  ) -> Result<(), StoreError>;

  fn soft_delete_document(
    &mut self,
    id: DocumentId,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError>;
}

/// Everything a registry transaction can do.
pub trait LedgerTx: SequenceTx + PersonTx + DocumentTx {}

impl<T: SequenceTx + PersonTx + DocumentTx> LedgerTx for T {}

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`LedgerStore::list_documents`] and
/// [`LedgerStore::count_documents`]. Soft-deleted documents are never
/// returned.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
  /// Substring match over the document number and the person's full name.
  pub text:            Option<String>,
  /// Inclusive lower bound on `reported_at`.
  pub reported_from:   Option<DateTime<Utc>>,
  /// Exclusive upper bound on `reported_at`.
  pub reported_before: Option<DateTime<Utc>>,
  pub operator:        Option<UserId>,
  /// Order by `reported_at` ascending instead of the default descending.
  pub oldest_first:    bool,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a registry storage backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait LedgerStore: Send + Sync {
  /// Run `work` inside one write transaction. Commits if `work` returns `Ok`,
  /// rolls back otherwise. Begin and commit failures surface as
  /// [`crate::Error::Storage`] with [`crate::Phase::Transaction`].
  fn transact<T, F>(&self, work: F) -> impl Future<Output = Result<T>> + Send + '_
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn LedgerTx) -> Result<T> + Send + 'static;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Retrieve a hydrated live document. Returns `None` if not found or
  /// deleted. The status is the stored one; projection is the caller's job.
  fn get_document(
    &self,
    id: DocumentId,
  ) -> impl Future<Output = Result<Option<DocumentRecord>>> + Send + '_;

  fn list_documents<'a>(
    &'a self,
    query: &'a DocumentQuery,
  ) -> impl Future<Output = Result<Vec<DocumentRecord>>> + Send + 'a;

  /// Count matches for `query`, ignoring its limit and offset.
  fn count_documents<'a>(
    &'a self,
    query: &'a DocumentQuery,
  ) -> impl Future<Output = Result<u64>> + Send + 'a;

  // ── Users ─────────────────────────────────────────────────────────────

  fn add_user(&self, user: NewUser) -> impl Future<Output = Result<User>> + Send + '_;

  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>>> + Send + '_;

  // ── Audit trail ───────────────────────────────────────────────────────

  /// Most recent entries first.
  fn audit_entries(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AuditEntry>>> + Send + '_;
}

// ─── Test double ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod memory {
  //! Vector-backed doubles: [`MemoryTx`] for unit tests of the allocator and
  //! the person deduplication unit, and [`MemoryLedger`], a store with no
  //! pessimistic lock at all.

  use std::sync::{Mutex, PoisonError};

  use super::*;
  use crate::{
    audit::AuditSink,
    document::{DocumentStatus, LossItem},
  };

  #[derive(Default, Clone)]
  pub struct MemoryTx {
    pub numbers:   Vec<(i32, String)>,
    pub counter:   Counter,
    pub people:    Vec<Person>,
    pub users:     Vec<User>,
    pub documents: Vec<(DocumentId, NewDocument)>,
    pub items:     Vec<(DocumentId, NewLossItem)>,
    pub fail:      bool,
    pub locks:     usize,
  }

  fn broken() -> StoreError { "connection reset".into() }

  impl SequenceTx for MemoryTx {
    fn latest_number_in_year(
      &mut self,
      year: i32,
    ) -> Result<Option<String>, StoreError> {
      if self.fail {
        return Err(broken());
      }
      Ok(
        self
          .numbers
          .iter()
          .rev()
          .find(|(y, _)| *y == year)
          .map(|(_, n)| n.clone()),
      )
    }

    fn lock_counter(&mut self) -> Result<Counter, StoreError> {
      self.locks += 1;
      Ok(self.counter)
    }

    fn store_counter(&mut self, counter: Counter) -> Result<(), StoreError> {
      self.counter = counter;
      Ok(())
    }
  }

  impl PersonTx for MemoryTx {
    fn find_person_by_key(
      &mut self,
      full_name: &str,
      birth_date: NaiveDate,
    ) -> Result<Option<Person>, StoreError> {
      if self.fail {
        return Err(broken());
      }
      Ok(
        self
          .people
          .iter()
          .find(|p| p.full_name == full_name && p.birth_date == birth_date)
          .cloned(),
      )
    }

    fn get_person(&mut self, id: PersonId) -> Result<Option<Person>, StoreError> {
      Ok(self.people.iter().find(|p| p.person_id == id).cloned())
    }

    fn identifier_taken(&mut self, identifier: &str) -> Result<bool, StoreError> {
      Ok(self.people.iter().any(|p| p.identifier == identifier))
    }

    fn insert_person(
      &mut self,
      person: &NewPerson,
      at: DateTime<Utc>,
    ) -> Result<PersonId, StoreError> {
      let id = PersonId(self.people.len() as i64 + 1);
      self.people.push(person.clone().into_person(id, at));
      Ok(id)
    }

    fn update_person(&mut self, person: &Person) -> Result<(), StoreError> {
      let slot = self
        .people
        .iter_mut()
        .find(|p| p.person_id == person.person_id)
        .ok_or_else(broken)?;
      *slot = person.clone();
      Ok(())
    }
  }

  impl DocumentTx for MemoryTx {
    fn get_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
      Ok(self.users.iter().find(|u| u.user_id == id).cloned())
    }

    fn live_document(
      &mut self,
      id: DocumentId,
    ) -> Result<Option<DocumentHeader>, StoreError> {
      Ok(self.documents.iter().find(|(d, _)| *d == id).map(|(d, doc)| {
        DocumentHeader {
          document_id: *d,
          number:      doc.number.clone(),
          person_id:   doc.person_id,
          operator:    doc.operator,
        }
      }))
    }

    fn insert_document(
      &mut self,
      document: &NewDocument,
    ) -> Result<DocumentId, StoreError> {
      let id = DocumentId(self.documents.len() as i64 + 1);
      self.numbers.push((document.created_year, document.number.clone()));
      self.documents.push((id, document.clone()));
      Ok(id)
    }

    fn insert_items(
      &mut self,
      id: DocumentId,
      items: &[NewLossItem],
    ) -> Result<(), StoreError> {
      self.items.extend(items.iter().map(|item| (id, item.clone())));
      Ok(())
    }

    fn delete_items(&mut self, id: DocumentId) -> Result<(), StoreError> {
      self.items.retain(|(d, _)| *d != id);
      Ok(())
    }

    fn update_document(
      &mut self,
      id: DocumentId,
      patch: &DocumentPatch,
    ) -> Result<(), StoreError> {
      let (_, doc) = self
        .documents
        .iter_mut()
        .find(|(d, _)| *d == id)
        .ok_or_else(broken)?;
      doc.person_id = patch.person_id;
      doc.loss_location = patch.loss_location.clone();
      doc.reporting_officer = patch.reporting_officer;
      doc.approving_officer = patch.approving_officer;
      Ok(())
    }

    fn rename_document(
      &mut self,
      id: DocumentId,
      number: &str,
    ) -> Result<(), StoreError> {
      if let Some((_, doc)) = self.documents.iter_mut().find(|(d, _)| *d == id) {
        doc.number = number.to_owned();
      }
      Ok(())
    }

    fn soft_delete_document(
      &mut self,
      id: DocumentId,
      _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
      self.documents.retain(|(d, _)| *d != id);
      Ok(())
    }
  }

  impl MemoryTx {
    fn record(&self, id: DocumentId) -> Option<DocumentRecord> {
      let (_, doc) = self.documents.iter().find(|(d, _)| *d == id)?;
      let user = |id: UserId| self.users.iter().find(|u| u.user_id == id).cloned();
      let items = self
        .items
        .iter()
        .filter(|(d, _)| *d == id)
        .enumerate()
        .map(|(n, (_, item))| LossItem {
          item_id:     n as i64 + 1,
          name:        item.name.clone(),
          description: item.description.clone(),
        })
        .collect();
      Some(DocumentRecord {
        document_id: id,
        number: doc.number.clone(),
        reported_at: doc.reported_at,
        status: DocumentStatus::Issued,
        loss_location: doc.loss_location.clone(),
        person: self.people.iter().find(|p| p.person_id == doc.person_id)?.clone(),
        items,
        reporting_officer: user(doc.reporting_officer)?,
        approving_officer: doc.approving_officer.and_then(user),
        approved_at: doc.approved_at,
        operator: user(doc.operator)?,
        last_modified_by: None,
        created_at: doc.reported_at,
        updated_at: doc.reported_at,
      })
    }
  }

  /// A store whose transactions take no lock: each one copies the state,
  /// yields, runs on the copy and then overwrites the state with it. Two
  /// overlapping transactions therefore both see the same counter, and only
  /// the registry's issue guard keeps creations apart.
  #[derive(Default)]
  pub struct MemoryLedger {
    state: Mutex<MemoryTx>,
    audit: Mutex<Vec<AuditEntry>>,
  }

  impl MemoryLedger {
    pub fn with_users(users: Vec<User>) -> Self {
      Self {
        state: Mutex::new(MemoryTx { users, ..MemoryTx::default() }),
        audit: Mutex::default(),
      }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryTx> {
      self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
  }

  impl LedgerStore for MemoryLedger {
    async fn transact<T, F>(&self, work: F) -> Result<T>
    where
      T: Send + 'static,
      F: FnOnce(&mut dyn LedgerTx) -> Result<T> + Send + 'static,
    {
      let mut snapshot = self.state().clone();
      tokio::task::yield_now().await;
      let result = work(&mut snapshot);
      tokio::task::yield_now().await;
      if result.is_ok() {
        *self.state() = snapshot;
      }
      result
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>> {
      Ok(self.state().record(id))
    }

    async fn list_documents<'a>(
      &'a self,
      _query: &'a DocumentQuery,
    ) -> Result<Vec<DocumentRecord>> {
      let state = self.state();
      Ok(state.documents.iter().filter_map(|(id, _)| state.record(*id)).collect())
    }

    async fn count_documents<'a>(&'a self, _query: &'a DocumentQuery) -> Result<u64> {
      Ok(self.state().documents.len() as u64)
    }

    async fn add_user(&self, user: NewUser) -> Result<User> {
      let mut state = self.state();
      let user = User {
        user_id: UserId(state.users.len() as i64 + 1),
        full_name: user.full_name,
        registration_number: user.registration_number,
        rank: user.rank,
        position: user.position,
        role: user.role,
        created_at: Utc::now(),
      };
      state.users.push(user.clone());
      Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
      Ok(self.state().users.iter().find(|u| u.user_id == id).cloned())
    }

    async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
      let audit = self.audit.lock().unwrap_or_else(PoisonError::into_inner);
      Ok(audit.iter().rev().take(limit).cloned().collect())
    }
  }

  impl AuditSink for MemoryLedger {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
      self.audit.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
      Ok(())
    }
  }
}
