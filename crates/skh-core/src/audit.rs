//! Audit trail: entry types, the sink trait backends implement, and the
//! fire-and-forget emitter used by the registry after a commit.

use std::{
  fmt,
  future::Future,
  pin::pin,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{StoreError, user::UserId};

// ─── Entries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
  CreateDocument,
  UpdateDocument,
  DeleteDocument,
}

impl AuditAction {
  pub fn label(self) -> &'static str {
    match self {
      Self::CreateDocument => "CREATE DOCUMENT",
      Self::UpdateDocument => "UPDATE DOCUMENT",
      Self::DeleteDocument => "DELETE DOCUMENT",
    }
  }
}

impl fmt::Display for AuditAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
  pub entry_id:    Uuid,
  pub actor:       UserId,
  /// An [`AuditAction`] label. Kept as text so entries written by other
  /// tools still load.
  pub action:      String,
  pub detail:      String,
  pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
  pub fn new(
    actor: UserId,
    action: AuditAction,
    detail: impl Into<String>,
    recorded_at: DateTime<Utc>,
  ) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      actor,
      action: action.label().to_owned(),
      detail: detail.into(),
      recorded_at,
    }
  }
}

/// Destination of audit entries.
pub trait AuditSink: Send + Sync + 'static {
  fn record(
    &self,
    entry: AuditEntry,
  ) -> impl Future<Output = Result<(), StoreError>> + Send + '_;
}

// ─── Pending-write tracking ──────────────────────────────────────────────────

/// Counts audit writes that have been scheduled but not yet finished.
#[derive(Debug, Default)]
pub struct PendingWrites {
  in_flight: AtomicUsize,
  idle:      Notify,
}

impl PendingWrites {
  pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

  pub fn in_flight(&self) -> usize { self.in_flight.load(Ordering::Acquire) }

  fn begin(self: &Arc<Self>) -> PendingGuard {
    self.in_flight.fetch_add(1, Ordering::AcqRel);
    PendingGuard(Arc::clone(self))
  }

  /// Resolve once no write is in flight.
  pub async fn wait_idle(&self) {
    loop {
      let mut notified = pin!(self.idle.notified());
      notified.as_mut().enable();
      if self.in_flight() == 0 {
        return;
      }
      notified.await;
    }
  }
}

struct PendingGuard(Arc<PendingWrites>);

impl Drop for PendingGuard {
  fn drop(&mut self) {
    if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.0.idle.notify_waiters();
    }
  }
}

// ─── Emitter ─────────────────────────────────────────────────────────────────

/// Schedules audit writes on the current tokio runtime without awaiting them.
pub struct AuditEmitter<A> {
  sink:    Arc<A>,
  pending: Option<Arc<PendingWrites>>,
}

impl<A> Clone for AuditEmitter<A> {
  fn clone(&self) -> Self {
    Self { sink: Arc::clone(&self.sink), pending: self.pending.clone() }
  }
}

impl<A: AuditSink> AuditEmitter<A> {
  pub fn new(sink: Arc<A>) -> Self { Self { sink, pending: None } }

  pub fn with_tracker(mut self, pending: Arc<PendingWrites>) -> Self {
    self.pending = Some(pending);
    self
  }

  /// Queue `entry` and return immediately. Failures are logged, never
  /// returned.
  pub fn emit(&self, entry: AuditEntry) {
    let Ok(handle) = Handle::try_current() else {
      warn!(action = %entry.action, "no async runtime; audit entry dropped");
      return;
    };

    let guard = self.pending.as_ref().map(PendingWrites::begin);
    let sink = Arc::clone(&self.sink);
    handle.spawn(async move {
      let _guard = guard;
      let action = entry.action.clone();
      let entry_id = entry.entry_id;
      match sink.record(entry).await {
        Ok(()) => debug!(%entry_id, %action, "audit entry written"),
        Err(e) => warn!(%entry_id, %action, error = %e, "audit write failed"),
      }
    });
  }
}
