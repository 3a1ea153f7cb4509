//! [`SqliteTx`]: the transaction handed to registry closures. It borrows the
//! connection of an open `BEGIN IMMEDIATE` transaction, so every statement it
//! runs happens under the database write lock.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use skh_core::{
  StoreError,
  document::{DocumentHeader, DocumentId, DocumentPatch, NewDocument, NewLossItem},
  numbering::Counter,
  person::{NewPerson, Person, PersonId},
  store::{DocumentTx, PersonTx, SequenceTx},
  user::{User, UserId},
};

use crate::{
  Error,
  encode::{PERSON_COLUMNS, RawPerson, encode_date, encode_dt},
  query::{load_person, load_user},
  schema::{COUNTER_RUNNING_KEY, COUNTER_YEAR_KEY},
};

pub(crate) struct SqliteTx<'a> {
  conn: &'a Connection,
}

impl<'a> SqliteTx<'a> {
  pub(crate) fn new(conn: &'a Connection) -> Self { Self { conn } }

  fn counter_entry(&self, key: &'static str) -> Result<i64, StoreError> {
    let value: Option<String> = self
      .conn
      .query_row(
        "SELECT value FROM configurations WHERE key = ?1",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    match value {
      None => Ok(0),
      Some(v) => v
        .trim()
        .parse::<i64>()
        .map_err(|_| StoreError::from(Error::BadCounter { key, value: v })),
    }
  }

  fn put_counter_entry(&self, key: &str, value: i64) -> Result<(), StoreError> {
    self.conn.execute(
      "INSERT INTO configurations (key, value) VALUES (?1, ?2)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      params![key, value.to_string()],
    )?;
    Ok(())
  }
}

// ─── Sequence ────────────────────────────────────────────────────────────────

impl SequenceTx for SqliteTx<'_> {
  fn latest_number_in_year(&mut self, year: i32) -> Result<Option<String>, StoreError> {
    Ok(
      self
        .conn
        .query_row(
          "SELECT number FROM documents WHERE created_year = ?1
           ORDER BY document_id DESC LIMIT 1",
          params![year],
          |row| row.get(0),
        )
        .optional()?,
    )
  }

  fn lock_counter(&mut self) -> Result<Counter, StoreError> {
    let running = self.counter_entry(COUNTER_RUNNING_KEY)?;
    let year = self.counter_entry(COUNTER_YEAR_KEY)?;
    let out_of_range = |key: &'static str, value: i64| {
      StoreError::from(Error::BadCounter { key, value: value.to_string() })
    };
    Ok(Counter {
      running: u32::try_from(running)
        .map_err(|_| out_of_range(COUNTER_RUNNING_KEY, running))?,
      year:    i32::try_from(year).map_err(|_| out_of_range(COUNTER_YEAR_KEY, year))?,
    })
  }

  fn store_counter(&mut self, counter: Counter) -> Result<(), StoreError> {
    self.put_counter_entry(COUNTER_RUNNING_KEY, i64::from(counter.running))?;
    self.put_counter_entry(COUNTER_YEAR_KEY, i64::from(counter.year))
  }
}

// ─── Persons ─────────────────────────────────────────────────────────────────

impl PersonTx for SqliteTx<'_> {
  fn find_person_by_key(
    &mut self,
    full_name: &str,
    birth_date: NaiveDate,
  ) -> Result<Option<Person>, StoreError> {
    let raw = self
      .conn
      .query_row(
        &format!(
          "SELECT {PERSON_COLUMNS} FROM persons
           WHERE full_name = ?1 AND birth_date = ?2
           ORDER BY person_id LIMIT 1"
        ),
        params![full_name, encode_date(birth_date)],
        RawPerson::from_row,
      )
      .optional()?;
    Ok(raw.map(RawPerson::into_person).transpose()?)
  }

  fn get_person(&mut self, id: PersonId) -> Result<Option<Person>, StoreError> {
    let raw = load_person(self.conn, id.0)?;
    Ok(raw.map(RawPerson::into_person).transpose()?)
  }

  fn identifier_taken(&mut self, identifier: &str) -> Result<bool, StoreError> {
    Ok(
      self
        .conn
        .query_row(
          "SELECT 1 FROM persons WHERE identifier = ?1",
          params![identifier],
          |_| Ok(()),
        )
        .optional()?
        .is_some(),
    )
  }

  fn insert_person(
    &mut self,
    person: &NewPerson,
    at: DateTime<Utc>,
  ) -> Result<PersonId, StoreError> {
    let at = encode_dt(at);
    self.conn.execute(
      "INSERT INTO persons (
         identifier, full_name, birth_place, birth_date, gender,
         religion, occupation, address, created_at, updated_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
      params![
        person.identifier,
        person.full_name,
        person.birth_place,
        encode_date(person.birth_date),
        person.gender,
        person.religion,
        person.occupation,
        person.address,
        at,
      ],
    )?;
    Ok(PersonId(self.conn.last_insert_rowid()))
  }

  fn update_person(&mut self, person: &Person) -> Result<(), StoreError> {
    self.conn.execute(
      "UPDATE persons SET
         identifier = ?2, full_name = ?3, birth_place = ?4, birth_date = ?5,
         gender = ?6, religion = ?7, occupation = ?8, address = ?9,
         updated_at = ?10
       WHERE person_id = ?1",
      params![
        person.person_id.0,
        person.identifier,
        person.full_name,
        person.birth_place,
        encode_date(person.birth_date),
        person.gender,
        person.religion,
        person.occupation,
        person.address,
        encode_dt(person.updated_at),
      ],
    )?;
    Ok(())
  }
}

// ─── Documents ───────────────────────────────────────────────────────────────

impl DocumentTx for SqliteTx<'_> {
  fn get_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
    let raw = load_user(self.conn, id.0)?;
    Ok(raw.map(|r| r.into_user()).transpose()?)
  }

  fn live_document(
    &mut self,
    id: DocumentId,
  ) -> Result<Option<DocumentHeader>, StoreError> {
    Ok(
      self
        .conn
        .query_row(
          "SELECT number, person_id, operator_id FROM documents
           WHERE document_id = ?1 AND deleted_at IS NULL",
          params![id.0],
          |row| {
            Ok(DocumentHeader {
              document_id: id,
              number:      row.get(0)?,
              person_id:   PersonId(row.get(1)?),
              operator:    UserId(row.get(2)?),
            })
          },
        )
        .optional()?,
    )
  }

  fn insert_document(&mut self, document: &NewDocument) -> Result<DocumentId, StoreError> {
    let reported_at = encode_dt(document.reported_at);
    self.conn.execute(
      "INSERT INTO documents (
         number, reported_at, created_year, status, loss_location, person_id,
         reporting_officer_id, approving_officer_id, approved_at, operator_id,
         created_at, updated_at
       ) VALUES (?1, ?2, ?3, 'ISSUED', ?4, ?5, ?6, ?7, ?8, ?9, ?2, ?2)",
      params![
        document.number,
        reported_at,
        document.created_year,
        document.loss_location,
        document.person_id.0,
        document.reporting_officer.0,
        document.approving_officer.map(|u| u.0),
        document.approved_at.map(encode_dt),
        document.operator.0,
      ],
    )?;
    Ok(DocumentId(self.conn.last_insert_rowid()))
  }

  fn insert_items(&mut self, id: DocumentId, items: &[NewLossItem]) -> Result<(), StoreError> {
    let mut stmt = self.conn.prepare_cached(
      "INSERT INTO loss_items (document_id, name, description) VALUES (?1, ?2, ?3)",
    )?;
    for item in items {
      stmt.execute(params![id.0, item.name.trim(), item.description])?;
    }
    Ok(())
  }

  fn delete_items(&mut self, id: DocumentId) -> Result<(), StoreError> {
    self
      .conn
      .execute("DELETE FROM loss_items WHERE document_id = ?1", params![id.0])?;
    Ok(())
  }

  fn update_document(
    &mut self,
    id: DocumentId,
    patch: &DocumentPatch,
  ) -> Result<(), StoreError> {
    self.conn.execute(
      "UPDATE documents SET
         loss_location        = ?2,
         reporting_officer_id = ?3,
         approving_officer_id = ?4,
         approved_at          = CASE WHEN ?4 IS NULL THEN NULL
                                     ELSE COALESCE(approved_at, ?6) END,
         last_modified_by     = ?5,
         updated_at           = ?6,
         person_id            = ?7
       WHERE document_id = ?1",
      params![
        id.0,
        patch.loss_location,
        patch.reporting_officer.0,
        patch.approving_officer.map(|u| u.0),
        patch.last_modified_by.0,
        encode_dt(patch.updated_at),
        patch.person_id.0,
      ],
    )?;
    Ok(())
  }

  fn rename_document(&mut self, id: DocumentId, number: &str) -> Result<(), StoreError> {
    self.conn.execute(
      "UPDATE documents SET number = ?2 WHERE document_id = ?1",
      params![id.0, number],
    )?;
    Ok(())
  }

  fn soft_delete_document(
    &mut self,
    id: DocumentId,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let at = encode_dt(at);
    self.conn.execute(
      "UPDATE documents SET deleted_at = ?2, updated_at = ?2 WHERE document_id = ?1",
      params![id.0, at],
    )?;
    Ok(())
  }
}
