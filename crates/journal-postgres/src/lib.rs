//! PostgreSQL storage backend for journal entries, on the blocking `postgres` client.
//!
//! The client drives its own runtime internally, so it must not be called from a
//! tokio worker thread. Connect and query from `spawn_blocking` or plain threads.

use std::sync::{Mutex, MutexGuard};

use postgres::{Client, NoTls, Row};
use uuid::Uuid;

use journal_core::{Entry, EntryQuery, EntryStore, Migration, SchemaMigrator, StorageError};

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_entries",
        sql: "
            CREATE TABLE entries (
                id UUID PRIMARY KEY,
                work TEXT NOT NULL,
                struggle TEXT NOT NULL,
                intention TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
        ",
    },
    Migration {
        version: 2,
        name: "index_entries_created_at",
        sql: "CREATE INDEX idx_pg_entries_created_at ON entries(created_at);",
    },
];

const SELECT_ENTRY: &str =
    "SELECT id, work, struggle, intention, created_at, updated_at FROM entries";

pub struct PostgresStore {
    connection_string: String,
    client: Mutex<Client>,
}

fn open_client(connection_string: &str) -> Result<Client, StorageError> {
    let client = Client::connect(connection_string, NoTls)
        .map_err(|e| StorageError::Connection(format!("PostgreSQL connection failed: {}", e)))?;
    tracing::debug!("PostgreSQL connection established");
    Ok(client)
}

impl PostgresStore {
    /// Connects with a plain `postgresql://` (synchronous driver) URL.
    pub fn connect(connection_string: &str) -> Result<Self, StorageError> {
        Ok(Self {
            connection_string: connection_string.to_string(),
            client: Mutex::new(open_client(connection_string)?),
        })
    }

    /// Locks the client, replacing it first if the server side has gone away.
    fn lock(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        let mut client = self.client.lock().map_err(|_| StorageError::Poisoned)?;
        if client.is_closed() {
            tracing::warn!("PostgreSQL connection closed, reconnecting");
            *client = open_client(&self.connection_string)?;
        }
        Ok(client)
    }
}

fn query_err(e: postgres::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn tx_err(e: postgres::Error) -> StorageError {
    StorageError::Transaction(e.to_string())
}

fn corrupt(e: postgres::Error) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

fn into_entry(row: &Row) -> Result<Entry, StorageError> {
    Ok(Entry {
        id: row.try_get(0).map_err(corrupt)?,
        work: row.try_get(1).map_err(corrupt)?,
        struggle: row.try_get(2).map_err(corrupt)?,
        intention: row.try_get(3).map_err(corrupt)?,
        created_at: row.try_get(4).map_err(corrupt)?,
        updated_at: row.try_get(5).map_err(corrupt)?,
    })
}

impl EntryStore for PostgresStore {
    fn insert(&self, entry: &Entry) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction().map_err(tx_err)?;
        tx.execute(
            "INSERT INTO entries (id, work, struggle, intention, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &entry.id,
                &entry.work,
                &entry.struggle,
                &entry.intention,
                &entry.created_at,
                &entry.updated_at,
            ],
        )
        .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(id = %entry.id, "PostgreSQL entry inserted");
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Entry>, StorageError> {
        let mut client = self.lock()?;
        let row = client
            .query_opt(&format!("{} WHERE id = $1", SELECT_ENTRY), &[&id])
            .map_err(query_err)?;
        row.as_ref().map(into_entry).transpose()
    }

    fn list(&self) -> Result<Vec<Entry>, StorageError> {
        let mut client = self.lock()?;
        let rows = client.query(SELECT_ENTRY, &[]).map_err(query_err)?;
        rows.iter().map(into_entry).collect()
    }

    fn query(&self, query: &EntryQuery) -> Result<Vec<Entry>, StorageError> {
        let mut client = self.lock()?;
        let dir = query.sort.as_sql();
        let sql = format!(
            "{}
             WHERE $1::TEXT IS NULL
                OR work ILIKE $1 ESCAPE '\\'
                OR struggle ILIKE $1 ESCAPE '\\'
                OR intention ILIKE $1 ESCAPE '\\'
             ORDER BY created_at {}, id {}
             LIMIT $2 OFFSET $3",
            SELECT_ENTRY, dir, dir
        );
        let pattern = query.like_pattern();
        let limit = query.limit as i64;
        let offset = query.offset as i64;
        let rows = client
            .query(&sql, &[&pattern, &limit, &offset])
            .map_err(query_err)?;
        rows.iter().map(into_entry).collect()
    }

    fn update(&self, entry: &Entry) -> Result<bool, StorageError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction().map_err(tx_err)?;
        let changed = tx
            .execute(
                "UPDATE entries
                 SET work = $2, struggle = $3, intention = $4, updated_at = $5
                 WHERE id = $1",
                &[
                    &entry.id,
                    &entry.work,
                    &entry.struggle,
                    &entry.intention,
                    &entry.updated_at,
                ],
            )
            .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(id = %entry.id, changed, "PostgreSQL entry updated");
        Ok(changed > 0)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction().map_err(tx_err)?;
        let changed = tx
            .execute("DELETE FROM entries WHERE id = $1", &[&id])
            .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(%id, changed, "PostgreSQL entry deleted");
        Ok(changed > 0)
    }
}

impl SchemaMigrator for PostgresStore {
    fn applied_versions(&self) -> Result<Vec<i64>, StorageError> {
        let mut client = self.lock()?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version BIGINT PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );",
            )
            .map_err(query_err)?;
        let rows = client
            .query("SELECT version FROM schema_migrations ORDER BY version", &[])
            .map_err(query_err)?;
        rows.iter()
            .map(|row| row.try_get::<_, i64>(0).map_err(corrupt))
            .collect()
    }

    fn apply_migration(&self, migration: &Migration) -> Result<(), StorageError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction().map_err(tx_err)?;
        tx.batch_execute(migration.sql).map_err(query_err)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::info!(version = migration.version, name = migration.name, "PostgreSQL migration applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::{now_utc, run_migrations, SortOrder};
    use time::Duration;

    // Needs a disposable database: TEST_DATABASE_URL=postgresql://... cargo test -- --ignored
    fn store() -> PostgresStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let storage = PostgresStore::connect(&url).unwrap();
        run_migrations(&storage, MIGRATIONS).unwrap();
        storage
            .lock()
            .unwrap()
            .batch_execute("DELETE FROM entries")
            .unwrap();
        storage
    }

    fn entry_at(base: time::OffsetDateTime, minutes: i64, work: &str) -> Entry {
        let ts = base + Duration::minutes(minutes);
        Entry {
            id: Uuid::new_v4(),
            work: work.to_string(),
            struggle: "struggle".to_string(),
            intention: "intention".to_string(),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    #[ignore]
    fn test_postgres_basic_operations() {
        let storage = store();
        let mut entry = entry_at(now_utc(), 0, "Did some cloud learning");
        storage.insert(&entry).unwrap();
        assert_eq!(storage.get(entry.id).unwrap(), Some(entry.clone()));

        entry.struggle = "joins".to_string();
        entry.updated_at += Duration::seconds(1);
        assert!(storage.update(&entry).unwrap());
        assert_eq!(storage.get(entry.id).unwrap(), Some(entry.clone()));

        assert!(storage.delete(entry.id).unwrap());
        assert_eq!(storage.get(entry.id).unwrap(), None);
        assert!(!storage.delete(entry.id).unwrap());
    }

    #[test]
    #[ignore]
    fn test_postgres_query_filter_sort_window() {
        let storage = store();
        let base = now_utc();
        let seeded: Vec<Entry> = (0..5)
            .map(|i| {
                let e = entry_at(base, i, if i % 2 == 0 { "Tokio" } else { "serde" });
                storage.insert(&e).unwrap();
                e
            })
            .collect();

        let page = storage
            .query(&EntryQuery { limit: 2, offset: 1, ..Default::default() })
            .unwrap();
        assert_eq!(page, vec![seeded[3].clone(), seeded[2].clone()]);

        let page = storage
            .query(&EntryQuery { limit: 2, offset: 1, sort: SortOrder::Old, ..Default::default() })
            .unwrap();
        assert_eq!(page, vec![seeded[1].clone(), seeded[2].clone()]);

        let hits = storage
            .query(&EntryQuery { q: Some("TOKIO".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    #[ignore]
    fn test_postgres_reconnects_after_backend_terminated() {
        let storage = store();
        let entry = entry_at(now_utc(), 0, "survives");
        storage.insert(&entry).unwrap();

        // kills this session's own backend; the call itself fails
        let _ = storage
            .client
            .lock()
            .unwrap()
            .batch_execute("SELECT pg_terminate_backend(pg_backend_pid())");
        assert!(storage.client.lock().unwrap().is_closed());

        assert_eq!(storage.get(entry.id).unwrap(), Some(entry));
    }
}
