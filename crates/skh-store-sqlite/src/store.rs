//! [`SqliteLedger`]: the SQLite implementation of [`LedgerStore`] and
//! [`AuditSink`].

use std::{path::Path, time::Duration};

use chrono::Utc;
use rusqlite::{TransactionBehavior, params};
use skh_core::{
  Phase, StoreError,
  audit::{AuditEntry, AuditSink},
  document::{DocumentId, DocumentRecord},
  store::{DocumentQuery, LedgerStore, LedgerTx},
  user::{NewUser, User, UserId},
};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawAuditEntry, RawRecord, RawUser, encode_dt},
  query::{DocumentFilter, load_record, load_user},
  schema::SCHEMA,
  tx::SqliteTx,
};

/// How long a connection waits for another connection's write lock before
/// giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// An SKH registry store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection handle is reference-counted. Each
/// [`SqliteLedger::open`] creates a separate connection, and separate
/// connections coordinate through SQLite's own locking.
#[derive(Clone)]
pub struct SqliteLedger {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteLedger {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT).await
  }

  pub async fn open_with_timeout(
    path: impl AsRef<Path>,
    busy_timeout: Duration,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init(busy_timeout).await?;
    Ok(store)
  }

  /// Open an in-memory store. Useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init(DEFAULT_BUSY_TIMEOUT).await?;
    Ok(store)
  }

  async fn init(&self, busy_timeout: Duration) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn read_record(&self, id: DocumentId) -> Result<Option<DocumentRecord>> {
    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| Ok(load_record(conn, id.0)?))
      .await?;
    raw.map(RawRecord::into_record).transpose()
  }

  async fn read_records(&self, filter: DocumentFilter) -> Result<Vec<DocumentRecord>> {
    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let ids = filter.ids(conn)?;
        let mut raws = Vec::with_capacity(ids.len());
        for id in ids {
          // The ids were read on this thread just now; nothing can delete
          // them in between.
          if let Some(raw) = load_record(conn, id)? {
            raws.push(raw);
          }
        }
        Ok(raws)
      })
      .await?;
    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn insert_user(&self, user: NewUser) -> Result<User> {
    let created_at = encode_dt(Utc::now());
    let raw: RawUser = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (
             full_name, registration_number, rank, position, role, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            user.full_name,
            user.registration_number,
            user.rank,
            user.position,
            user.role.as_str(),
            created_at,
          ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(load_user(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
      })
      .await?;
    raw.into_user()
  }

  async fn read_user(&self, id: UserId) -> Result<Option<User>> {
    let raw = self.conn.call(move |conn| Ok(load_user(conn, id.0)?)).await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn read_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, actor_id, action, detail, recorded_at
           FROM audit_logs ORDER BY recorded_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(params![limit], |row| {
            Ok(RawAuditEntry {
              entry_id:    row.get(0)?,
              actor_id:    row.get(1)?,
              action:      row.get(2)?,
              detail:      row.get(3)?,
              recorded_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }

  async fn insert_audit(&self, entry: AuditEntry) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audit_logs (entry_id, actor_id, action, detail, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![
            entry.entry_id.hyphenated().to_string(),
            entry.actor.0,
            entry.action,
            entry.detail,
            encode_dt(entry.recorded_at),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── LedgerStore impl ────────────────────────────────────────────────────────

impl LedgerStore for SqliteLedger {
  async fn transact<T, F>(&self, work: F) -> skh_core::Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn LedgerTx) -> skh_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        // IMMEDIATE takes the write lock up front, before anything is read.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        debug!("write transaction opened");
        let result = work(&mut SqliteTx::new(&tx));
        match result {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          // Dropping `tx` rolls back.
          Err(e) => Ok(Err(e)),
        }
      })
      .await;

    match outcome {
      Ok(result) => result,
      Err(e) => Err(Error::from(e).into_core(Phase::Transaction)),
    }
  }

  async fn get_document(&self, id: DocumentId) -> skh_core::Result<Option<DocumentRecord>> {
    self.read_record(id).await.map_err(|e| e.into_core(Phase::Read))
  }

  async fn list_documents<'a>(
    &'a self,
    query: &'a DocumentQuery,
  ) -> skh_core::Result<Vec<DocumentRecord>> {
    self
      .read_records(DocumentFilter::new(query))
      .await
      .map_err(|e| e.into_core(Phase::Read))
  }

  async fn count_documents<'a>(&'a self, query: &'a DocumentQuery) -> skh_core::Result<u64> {
    let filter = DocumentFilter::new(query);
    self
      .conn
      .call(move |conn| Ok(filter.count(conn)?))
      .await
      .map_err(|e| Error::from(e).into_core(Phase::Read))
  }

  async fn add_user(&self, user: NewUser) -> skh_core::Result<User> {
    self.insert_user(user).await.map_err(|e| e.into_core(Phase::Insertion))
  }

  async fn get_user(&self, id: UserId) -> skh_core::Result<Option<User>> {
    self.read_user(id).await.map_err(|e| e.into_core(Phase::Read))
  }

  async fn audit_entries(&self, limit: usize) -> skh_core::Result<Vec<AuditEntry>> {
    self.read_audit(limit).await.map_err(|e| e.into_core(Phase::Read))
  }
}

// ─── AuditSink impl ──────────────────────────────────────────────────────────

impl AuditSink for SqliteLedger {
  async fn record(&self, entry: AuditEntry) -> std::result::Result<(), StoreError> {
    Ok(self.insert_audit(entry).await?)
  }
}
