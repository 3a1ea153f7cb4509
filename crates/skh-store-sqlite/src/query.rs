//! Synchronous read helpers shared by the store and its transactions. All of
//! them run on the connection thread inside `Connection::call`.

use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter, types::Value};
use skh_core::store::DocumentQuery;

use crate::encode::{
  DOCUMENT_COLUMNS, PERSON_COLUMNS, RawDocument, RawItem, RawPerson, RawRecord,
  RawUser, USER_COLUMNS, encode_dt,
};

pub fn load_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<RawUser>> {
  conn
    .query_row(
      &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
      params![user_id],
      RawUser::from_row,
    )
    .optional()
}

pub fn load_person(
  conn: &Connection,
  person_id: i64,
) -> rusqlite::Result<Option<RawPerson>> {
  conn
    .query_row(
      &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE person_id = ?1"),
      params![person_id],
      RawPerson::from_row,
    )
    .optional()
}

/// A referenced row that foreign keys guarantee to exist.
fn referenced<T>(row: Option<T>) -> rusqlite::Result<T> {
  row.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// A live document with everything it references, or `None` if the document
/// does not exist or was deleted.
pub fn load_record(
  conn: &Connection,
  document_id: i64,
) -> rusqlite::Result<Option<RawRecord>> {
  let document = conn
    .query_row(
      &format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE document_id = ?1 AND deleted_at IS NULL"
      ),
      params![document_id],
      RawDocument::from_row,
    )
    .optional()?;
  let Some(document) = document else {
    return Ok(None);
  };

  let items = conn
    .prepare_cached(
      "SELECT item_id, name, description FROM loss_items
       WHERE document_id = ?1 ORDER BY item_id",
    )?
    .query_map(params![document_id], |row| {
      Ok(RawItem {
        item_id:     row.get(0)?,
        name:        row.get(1)?,
        description: row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let optional_user = |id: Option<i64>| -> rusqlite::Result<Option<RawUser>> {
    id.map(|id| load_user(conn, id).and_then(referenced)).transpose()
  };

  Ok(Some(RawRecord {
    person: referenced(load_person(conn, document.person_id)?)?,
    items,
    reporting_officer: referenced(load_user(conn, document.reporting_officer_id)?)?,
    approving_officer: optional_user(document.approving_officer_id)?,
    operator: referenced(load_user(conn, document.operator_id)?)?,
    last_modified_by: optional_user(document.last_modified_by)?,
    document,
  }))
}

// ─── Listing ─────────────────────────────────────────────────────────────────

/// A [`DocumentQuery`] lowered to SQL, owned so it can move onto the
/// connection thread.
pub struct DocumentFilter {
  predicate:    String,
  values:       Vec<Value>,
  oldest_first: bool,
  limit:        Option<usize>,
  offset:       Option<usize>,
}

impl DocumentFilter {
  pub fn new(query: &DocumentQuery) -> Self {
    let mut clauses = vec!["d.deleted_at IS NULL".to_owned()];
    let mut values = Vec::new();

    if let Some(text) = &query.text {
      values.push(Value::Text(format!("%{}%", escape_like(text))));
      let n = values.len();
      clauses.push(format!(
        "(d.number LIKE ?{n} ESCAPE '\\' OR p.full_name LIKE ?{n} ESCAPE '\\')"
      ));
    }
    if let Some(from) = query.reported_from {
      values.push(Value::Text(encode_dt(from)));
      clauses.push(format!("d.reported_at >= ?{}", values.len()));
    }
    if let Some(before) = query.reported_before {
      values.push(Value::Text(encode_dt(before)));
      clauses.push(format!("d.reported_at < ?{}", values.len()));
    }
    if let Some(operator) = query.operator {
      values.push(Value::Integer(operator.0));
      clauses.push(format!("d.operator_id = ?{}", values.len()));
    }

    Self {
      predicate: clauses.join(" AND "),
      values,
      oldest_first: query.oldest_first,
      limit: query.limit,
      offset: query.offset,
    }
  }

  /// Matching document ids in listing order.
  pub fn ids(&self, conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let direction = if self.oldest_first { "ASC" } else { "DESC" };
    let mut sql = format!(
      "SELECT d.document_id FROM documents d
       JOIN persons p ON p.person_id = d.person_id
       WHERE {}
       ORDER BY d.reported_at {direction}, d.document_id {direction}",
      self.predicate
    );
    if self.limit.is_some() || self.offset.is_some() {
      let limit = self.limit.map_or(-1, |l| l as i64);
      let offset = self.offset.unwrap_or(0);
      sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    }

    conn
      .prepare(&sql)?
      .query_map(params_from_iter(self.values.iter()), |row| row.get(0))?
      .collect()
  }

  pub fn count(&self, conn: &Connection) -> rusqlite::Result<u64> {
    let sql = format!(
      "SELECT COUNT(*) FROM documents d
       JOIN persons p ON p.person_id = d.person_id
       WHERE {}",
      self.predicate
    );
    let n: i64 =
      conn.query_row(&sql, params_from_iter(self.values.iter()), |row| row.get(0))?;
    Ok(n.max(0) as u64)
  }
}

fn escape_like(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}
