//! Core types and traits for journal entry storage backends.
//!
//! This crate provides the `EntryStore` trait, the stored `Entry` record and the
//! request/response schema types, so that storage implementations can live in
//! separate crates.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{now_utc, Entry, EntryQuery, SortOrder, DEFAULT_LIMIT};
pub use models::read::EntryView;
pub use models::write::{
    CreateEntryCommand, FieldError, UpdateEntryCommand, Validate, ValidationError, MAX_FIELD_CHARS,
};
pub use storage::{pending_migrations, run_migrations, EntryStore, Migration, SchemaMigrator, StorageError};
