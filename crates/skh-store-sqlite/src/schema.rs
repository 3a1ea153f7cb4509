//! SQL schema for the SKH SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name           TEXT NOT NULL,
    registration_number TEXT NOT NULL UNIQUE,
    rank                TEXT,
    position            TEXT,
    role                TEXT NOT NULL DEFAULT 'OPERATOR',  -- 'SUPER_ADMIN' | 'OPERATOR'
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS persons (
    person_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier  TEXT NOT NULL UNIQUE,   -- government id or TEMP placeholder
    full_name   TEXT NOT NULL,
    birth_place TEXT NOT NULL DEFAULT '',
    birth_date  TEXT NOT NULL,          -- YYYY-MM-DD
    gender      TEXT NOT NULL DEFAULT '',
    religion    TEXT NOT NULL DEFAULT '',
    occupation  TEXT NOT NULL DEFAULT '',
    address     TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Soft-deleted documents keep their row; the number is rewritten to
-- DELETED_<unix seconds>_<number> so the original value is free again.
CREATE TABLE IF NOT EXISTS documents (
    document_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    number               TEXT NOT NULL UNIQUE,
    reported_at          TEXT NOT NULL,
    created_year         INTEGER NOT NULL,
    status               TEXT NOT NULL DEFAULT 'ISSUED',
    loss_location        TEXT NOT NULL DEFAULT '',
    person_id            INTEGER NOT NULL REFERENCES persons(person_id),
    reporting_officer_id INTEGER NOT NULL REFERENCES users(user_id),
    approving_officer_id INTEGER REFERENCES users(user_id),
    approved_at          TEXT,
    operator_id          INTEGER NOT NULL REFERENCES users(user_id),
    last_modified_by     INTEGER REFERENCES users(user_id),
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    deleted_at           TEXT
);

CREATE TABLE IF NOT EXISTS loss_items (
    item_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(document_id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

-- Key/value settings owned by the core: the sequence counter lives here.
CREATE TABLE IF NOT EXISTS configurations (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    entry_id    TEXT PRIMARY KEY,
    actor_id    INTEGER NOT NULL,
    action      TEXT NOT NULL,
    detail      TEXT NOT NULL DEFAULT '',
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS documents_year_idx     ON documents(created_year, document_id);
CREATE INDEX IF NOT EXISTS documents_reported_idx ON documents(reported_at);
CREATE INDEX IF NOT EXISTS persons_key_idx        ON persons(full_name, birth_date);
CREATE INDEX IF NOT EXISTS loss_items_doc_idx     ON loss_items(document_id);
CREATE INDEX IF NOT EXISTS audit_recorded_idx     ON audit_logs(recorded_at);

PRAGMA user_version = 1;
";

/// Keys of the counter entries in `configurations`.
pub const COUNTER_RUNNING_KEY: &str = "last_running_number";
pub const COUNTER_YEAR_KEY: &str = "last_running_year";
