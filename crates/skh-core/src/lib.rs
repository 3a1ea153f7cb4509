//! Core of the SKH registry: numbered lost-property reports (Surat Keterangan
//! Hilang).
//!
//! This crate owns the domain types, the numbering and projection rules, and
//! the [`Registry`] coordinator. It is free of database dependencies; storage
//! backends implement the traits in [`store`] and [`audit`].

pub mod audit;
pub mod clock;
pub mod document;
pub mod error;
pub mod numbering;
pub mod person;
pub mod registry;
pub mod settings;
pub mod status;
pub mod store;
pub mod user;

pub use error::{Error, ErrorKind, Phase, Result, StoreError};
pub use registry::{Page, PageRequest, Registry, StatusFilter};
pub use settings::Settings;
