use std::sync::Arc;

use journal_core::{run_migrations, EntryStore, Migration, SchemaMigrator, StorageError};
use journal_memory::InMemoryStore;
use journal_postgres::PostgresStore;
use journal_sqlite::SqliteStore;

/// A storage backend chosen by connection-string scheme.
pub enum Backend {
    Memory(InMemoryStore),
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
}

/// Opens the backend named by `url`:
///
/// * `memory://` - process-local, nothing persisted
/// * `sqlite://<path>` - SQLite file, schema applied by `journal-migrate`
/// * `sqlite::memory:` - private in-memory SQLite database, migrated here since no other
///   connection can ever reach it
/// * `postgresql://...`, `postgres://...` - PostgreSQL through the blocking driver
///
/// Blocks while connecting; call from a blocking context.
pub fn open(url: &str) -> Result<Backend, StorageError> {
    if url == "memory://" || url == "memory" {
        return Ok(Backend::Memory(InMemoryStore::new()));
    }
    if url == "sqlite::memory:" {
        let store = SqliteStore::open(":memory:")?;
        run_migrations(&store, journal_sqlite::MIGRATIONS)?;
        return Ok(Backend::Sqlite(store));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(StorageError::UnsupportedUrl(url.to_string()));
        }
        return SqliteStore::open(path).map(Backend::Sqlite);
    }
    if url.starts_with("postgresql://") || url.starts_with("postgres://") {
        return PostgresStore::connect(url).map(Backend::Postgres);
    }
    Err(StorageError::UnsupportedUrl(url.to_string()))
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            Backend::Sqlite(_) => "sqlite",
            Backend::Postgres(_) => "postgres",
        }
    }

    /// Schema hook and migration set, or `None` for backends without a schema.
    pub fn migrator(&self) -> Option<(&dyn SchemaMigrator, &'static [Migration])> {
        match self {
            Backend::Memory(_) => None,
            Backend::Sqlite(store) => Some((store, journal_sqlite::MIGRATIONS)),
            Backend::Postgres(store) => Some((store, journal_postgres::MIGRATIONS)),
        }
    }

    pub fn into_store(self) -> Arc<dyn EntryStore> {
        match self {
            Backend::Memory(store) => Arc::new(store),
            Backend::Sqlite(store) => Arc::new(store),
            Backend::Postgres(store) => Arc::new(store),
        }
    }
}
