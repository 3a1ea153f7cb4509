//! SQLite backend for the SKH registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Write transactions open with
//! `BEGIN IMMEDIATE`, which is the pessimistic lock the numbering sequence
//! relies on across connections and processes.

mod encode;
mod query;
mod schema;
mod store;
mod tx;

pub mod error;

pub use error::{Error, Result};
pub use store::{DEFAULT_BUSY_TIMEOUT, SqliteLedger};
