use uuid::Uuid;

use crate::models::{Entry, EntryQuery};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("storage worker failed: {0}")]
    Worker(String),
    #[error("{0}")]
    Other(String),
}

/// Persistence for journal entries.
///
/// Every mutating call is a single transaction: it either commits completely or
/// returns an error and leaves nothing behind. Calls block, so async callers should
/// run them on a blocking thread.
pub trait EntryStore: Send + Sync {
    fn insert(&self, entry: &Entry) -> Result<(), StorageError>;
    fn get(&self, id: Uuid) -> Result<Option<Entry>, StorageError>;
    fn list(&self) -> Result<Vec<Entry>, StorageError>;
    fn query(&self, query: &EntryQuery) -> Result<Vec<Entry>, StorageError>;
    /// Overwrites the stored row with the same id. Returns false when no such row exists.
    fn update(&self, entry: &Entry) -> Result<bool, StorageError>;
    fn delete(&self, id: Uuid) -> Result<bool, StorageError>;
}

/// One versioned schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Backend hook used by [`run_migrations`].
pub trait SchemaMigrator {
    /// Versions already recorded, creating the bookkeeping table if needed.
    fn applied_versions(&self) -> Result<Vec<i64>, StorageError>;
    /// Runs the migration and records its version in one transaction.
    fn apply_migration(&self, migration: &Migration) -> Result<(), StorageError>;
}

pub fn pending_migrations<'a>(applied: &[i64], migrations: &'a [Migration]) -> Vec<&'a Migration> {
    let mut pending: Vec<_> = migrations
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

/// Applies every migration not yet recorded, in version order. Returns the versions applied.
pub fn run_migrations(
    migrator: &dyn SchemaMigrator,
    migrations: &[Migration],
) -> Result<Vec<i64>, StorageError> {
    let applied = migrator.applied_versions()?;
    let mut done = Vec::new();
    for migration in pending_migrations(&applied, migrations) {
        migrator.apply_migration(migration)?;
        done.push(migration.version);
    }
    Ok(done)
}
