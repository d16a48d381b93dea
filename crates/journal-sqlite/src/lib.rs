//! SQLite storage backend for journal entries.
//!
//! Timestamps are stored as integer microseconds since the Unix epoch so that
//! `ORDER BY created_at` is a numeric sort. Filtering folds case with
//! `unicode_lower`, registered on every connection, since SQLite's own `lower()`
//! only handles ASCII.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{functions::FunctionFlags, params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

use journal_core::{Entry, EntryQuery, EntryStore, Migration, SchemaMigrator, StorageError};

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_entries",
        sql: "
            CREATE TABLE entries (
                id TEXT PRIMARY KEY,
                work TEXT NOT NULL,
                struggle TEXT NOT NULL,
                intention TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        ",
    },
    Migration {
        version: 2,
        name: "index_entries_created_at",
        sql: "CREATE INDEX idx_entries_created_at ON entries(created_at);",
    },
];

const SELECT_ENTRY: &str =
    "SELECT id, work, struggle, intention, created_at, updated_at FROM entries";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`. `:memory:` gives a private in-memory
    /// database. The schema is not created here; run the migrations first.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| StorageError::Connection(e.to_string()))?;
        }
        register_functions(&conn).map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::debug!(path, "SQLite database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

/// Same case folding as `EntryQuery::like_pattern`, so the pattern and the column agree.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<String>(0)?.to_lowercase()),
    )
}

type RawRow = (String, String, String, String, i64, i64);

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_micros(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000) as i64
}

fn from_micros(micros: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .map_err(|e| StorageError::Corrupt(format!("timestamp {}: {}", micros, e)))
}

fn into_entry(raw: RawRow) -> Result<Entry, StorageError> {
    let (id, work, struggle, intention, created_at, updated_at) = raw;
    Ok(Entry {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Corrupt(format!("id {}: {}", id, e)))?,
        work,
        struggle,
        intention,
        created_at: from_micros(created_at)?,
        updated_at: from_micros(updated_at)?,
    })
}

fn query_err(e: rusqlite::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn tx_err(e: rusqlite::Error) -> StorageError {
    StorageError::Transaction(e.to_string())
}

impl EntryStore for SqliteStore {
    fn insert(&self, entry: &Entry) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(tx_err)?;
        tx.execute(
            "INSERT INTO entries (id, work, struggle, intention, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.work,
                entry.struggle,
                entry.intention,
                to_micros(entry.created_at),
                to_micros(entry.updated_at),
            ],
        )
        .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(id = %entry.id, "SQLite entry inserted");
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Entry>, StorageError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_ENTRY),
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(query_err)?;
        raw.map(into_entry).transpose()
    }

    fn list(&self) -> Result<Vec<Entry>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(SELECT_ENTRY).map_err(query_err)?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        rows.into_iter().map(into_entry).collect()
    }

    fn query(&self, query: &EntryQuery) -> Result<Vec<Entry>, StorageError> {
        let conn = self.lock()?;
        let dir = query.sort.as_sql();
        let sql = format!(
            "{}
             WHERE ?1 IS NULL
                OR unicode_lower(work) LIKE ?1 ESCAPE '\\'
                OR unicode_lower(struggle) LIKE ?1 ESCAPE '\\'
                OR unicode_lower(intention) LIKE ?1 ESCAPE '\\'
             ORDER BY created_at {}, id {}
             LIMIT ?2 OFFSET ?3",
            SELECT_ENTRY, dir, dir
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![query.like_pattern(), query.limit as i64, query.offset as i64],
                read_row,
            )
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        rows.into_iter().map(into_entry).collect()
    }

    fn update(&self, entry: &Entry) -> Result<bool, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(tx_err)?;
        let changed = tx
            .execute(
                "UPDATE entries
                 SET work = ?2, struggle = ?3, intention = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    entry.id.to_string(),
                    entry.work,
                    entry.struggle,
                    entry.intention,
                    to_micros(entry.updated_at),
                ],
            )
            .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(id = %entry.id, changed, "SQLite entry updated");
        Ok(changed > 0)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(tx_err)?;
        let changed = tx
            .execute("DELETE FROM entries WHERE id = ?1", params![id.to_string()])
            .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::debug!(%id, changed, "SQLite entry deleted");
        Ok(changed > 0)
    }
}

impl SchemaMigrator for SqliteStore {
    fn applied_versions(&self) -> Result<Vec<i64>, StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );",
        )
        .map_err(query_err)?;
        let mut stmt = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")
            .map_err(query_err)?;
        let versions = stmt
            .query_map([], |row| row.get(0))
            .map_err(query_err)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(query_err)?;
        Ok(versions)
    }

    fn apply_migration(&self, migration: &Migration) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(tx_err)?;
        tx.execute_batch(migration.sql).map_err(query_err)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                to_micros(OffsetDateTime::now_utc())
            ],
        )
        .map_err(query_err)?;
        tx.commit().map_err(tx_err)?;
        tracing::info!(version = migration.version, name = migration.name, "SQLite migration applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::{run_migrations, SortOrder};
    use time::Duration;

    fn store() -> SqliteStore {
        let storage = SqliteStore::open(":memory:").unwrap();
        run_migrations(&storage, MIGRATIONS).unwrap();
        storage
    }

    fn entry_at(minutes: i64, work: &str) -> Entry {
        let ts = OffsetDateTime::UNIX_EPOCH + Duration::days(19_000) + Duration::minutes(minutes);
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
    fn test_sqlite_basic_operations() {
        let storage = store();
        let mut entry = entry_at(0, "Did some cloud learning");
        storage.insert(&entry).unwrap();

        assert_eq!(storage.get(entry.id).unwrap(), Some(entry.clone()));
        assert_eq!(storage.get(Uuid::new_v4()).unwrap(), None);

        entry.work = "Updated work".to_string();
        entry.updated_at += Duration::seconds(1);
        assert!(storage.update(&entry).unwrap());
        assert_eq!(storage.get(entry.id).unwrap(), Some(entry.clone()));

        assert!(storage.delete(entry.id).unwrap());
        assert!(!storage.delete(entry.id).unwrap());
        assert!(!storage.update(&entry).unwrap());
        assert!(storage.list().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_query_filter_sort_window() {
        let storage = store();
        let seeded: Vec<Entry> = (0..5)
            .map(|i| {
                let e = entry_at(i, if i == 3 { "100% Rust" } else { "rust basics" });
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
            .query(&EntryQuery { q: Some("RUST".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(hits.len(), 5);

        // % is literal, not a wildcard
        let hits = storage
            .query(&EntryQuery { q: Some("0% r".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(hits, vec![seeded[3].clone()]);
    }

    #[test]
    fn test_sqlite_filter_folds_non_ascii_case() {
        let storage = store();
        let ecole = entry_at(0, "École d'été");
        let strasse = Entry {
            struggle: "GROSSE ÜBUNG".to_string(),
            ..entry_at(1, "none")
        };
        storage.insert(&ecole).unwrap();
        storage.insert(&strasse).unwrap();

        let hits = storage
            .query(&EntryQuery { q: Some("éCOLE".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(hits, vec![ecole]);

        let hits = storage
            .query(&EntryQuery { q: Some("übung".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(hits, vec![strasse]);
    }

    #[test]
    fn test_sqlite_duplicate_insert_is_rolled_back() {
        let storage = store();
        let entry = entry_at(0, "once");
        storage.insert(&entry).unwrap();
        assert!(storage.insert(&entry).is_err());
        assert_eq!(storage.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_migrations_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let path = path.to_str().unwrap();

        let storage = SqliteStore::open(path).unwrap();
        assert_eq!(run_migrations(&storage, MIGRATIONS).unwrap(), vec![1, 2]);
        drop(storage);

        let storage = SqliteStore::open(path).unwrap();
        assert!(run_migrations(&storage, MIGRATIONS).unwrap().is_empty());
        assert_eq!(storage.applied_versions().unwrap(), vec![1, 2]);
    }
}
