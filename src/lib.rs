//! Journal API: CRUD over HTTP for daily journal entries.
//!
//! Request flow is `routes` → `service::EntryService` → `journal_core::EntryStore`
//! implementation picked by `storage::open` from the configured connection string.

pub mod config;
pub mod routes;
pub mod service;
pub mod storage;
pub mod telemetry;
