//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microsecond precision, so lexical order matches chronological order and
//! range filters can compare them as text. Birth dates are `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use skh_core::{
  audit::AuditEntry,
  document::{DocumentId, DocumentRecord, DocumentStatus, LossItem},
  person::{Person, PersonId},
  user::{Role, User, UserId},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_role(s: &str) -> Result<Role> {
  Role::parse(s).ok_or_else(|| Error::UnknownLabel { column: "role", value: s.to_owned() })
}

fn decode_status(s: &str) -> Result<DocumentStatus> {
  DocumentStatus::parse(s)
    .ok_or_else(|| Error::UnknownLabel { column: "status", value: s.to_owned() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str =
  "user_id, full_name, registration_number, rank, position, role, created_at";

/// Raw values read directly from a `users` row.
pub struct RawUser {
  pub user_id:             i64,
  pub full_name:           String,
  pub registration_number: String,
  pub rank:                Option<String>,
  pub position:            Option<String>,
  pub role:                String,
  pub created_at:          String,
}

impl RawUser {
  /// Read a row selected with [`USER_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:             row.get(0)?,
      full_name:           row.get(1)?,
      registration_number: row.get(2)?,
      rank:                row.get(3)?,
      position:            row.get(4)?,
      role:                row.get(5)?,
      created_at:          row.get(6)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:             UserId(self.user_id),
      full_name:           self.full_name,
      registration_number: self.registration_number,
      rank:                self.rank,
      position:            self.position,
      role:                decode_role(&self.role)?,
      created_at:          decode_dt(&self.created_at)?,
    })
  }
}

pub const PERSON_COLUMNS: &str = "person_id, identifier, full_name, birth_place, \
                                  birth_date, gender, religion, occupation, \
                                  address, created_at, updated_at";

/// Raw values read directly from a `persons` row.
pub struct RawPerson {
  pub person_id:   i64,
  pub identifier:  String,
  pub full_name:   String,
  pub birth_place: String,
  pub birth_date:  String,
  pub gender:      String,
  pub religion:    String,
  pub occupation:  String,
  pub address:     String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawPerson {
  /// Read a row selected with [`PERSON_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      person_id:   row.get(0)?,
      identifier:  row.get(1)?,
      full_name:   row.get(2)?,
      birth_place: row.get(3)?,
      birth_date:  row.get(4)?,
      gender:      row.get(5)?,
      religion:    row.get(6)?,
      occupation:  row.get(7)?,
      address:     row.get(8)?,
      created_at:  row.get(9)?,
      updated_at:  row.get(10)?,
    })
  }

  pub fn into_person(self) -> Result<Person> {
    Ok(Person {
      person_id:   PersonId(self.person_id),
      identifier:  self.identifier,
      full_name:   self.full_name,
      birth_place: self.birth_place,
      birth_date:  decode_date(&self.birth_date)?,
      gender:      self.gender,
      religion:    self.religion,
      occupation:  self.occupation,
      address:     self.address,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const DOCUMENT_COLUMNS: &str = "document_id, number, reported_at, status, \
                                    loss_location, person_id, reporting_officer_id, \
                                    approving_officer_id, approved_at, operator_id, \
                                    last_modified_by, created_at, updated_at";

/// Raw values read directly from a `documents` row.
pub struct RawDocument {
  pub document_id:          i64,
  pub number:               String,
  pub reported_at:          String,
  pub status:               String,
  pub loss_location:        String,
  pub person_id:            i64,
  pub reporting_officer_id: i64,
  pub approving_officer_id: Option<i64>,
  pub approved_at:          Option<String>,
  pub operator_id:          i64,
  pub last_modified_by:     Option<i64>,
  pub created_at:           String,
  pub updated_at:           String,
}

impl RawDocument {
  /// Read a row selected with [`DOCUMENT_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      document_id:          row.get(0)?,
      number:               row.get(1)?,
      reported_at:          row.get(2)?,
      status:               row.get(3)?,
      loss_location:        row.get(4)?,
      person_id:            row.get(5)?,
      reporting_officer_id: row.get(6)?,
      approving_officer_id: row.get(7)?,
      approved_at:          row.get(8)?,
      operator_id:          row.get(9)?,
      last_modified_by:     row.get(10)?,
      created_at:           row.get(11)?,
      updated_at:           row.get(12)?,
    })
  }
}

pub struct RawItem {
  pub item_id:     i64,
  pub name:        String,
  pub description: String,
}

impl From<RawItem> for LossItem {
  fn from(raw: RawItem) -> Self {
    Self { item_id: raw.item_id, name: raw.name, description: raw.description }
  }
}

/// A document row together with every row it references.
pub struct RawRecord {
  pub document:          RawDocument,
  pub person:            RawPerson,
  pub items:             Vec<RawItem>,
  pub reporting_officer: RawUser,
  pub approving_officer: Option<RawUser>,
  pub operator:          RawUser,
  pub last_modified_by:  Option<RawUser>,
}

impl RawRecord {
  pub fn into_record(self) -> Result<DocumentRecord> {
    let doc = self.document;
    Ok(DocumentRecord {
      document_id:       DocumentId(doc.document_id),
      number:            doc.number,
      reported_at:       decode_dt(&doc.reported_at)?,
      status:            decode_status(&doc.status)?,
      loss_location:     doc.loss_location,
      person:            self.person.into_person()?,
      items:             self.items.into_iter().map(LossItem::from).collect(),
      reporting_officer: self.reporting_officer.into_user()?,
      approving_officer: self.approving_officer.map(RawUser::into_user).transpose()?,
      approved_at:       doc.approved_at.as_deref().map(decode_dt).transpose()?,
      operator:          self.operator.into_user()?,
      last_modified_by:  self.last_modified_by.map(RawUser::into_user).transpose()?,
      created_at:        decode_dt(&doc.created_at)?,
      updated_at:        decode_dt(&doc.updated_at)?,
    })
  }
}

/// Raw values read directly from an `audit_logs` row.
pub struct RawAuditEntry {
  pub entry_id:    String,
  pub actor_id:    i64,
  pub action:      String,
  pub detail:      String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      entry_id:    Uuid::parse_str(&self.entry_id)?,
      actor:       UserId(self.actor_id),
      action:      self.action,
      detail:      self.detail,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
