//! In-memory `EntryStore`, used for development and tests.

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use uuid::Uuid;

use journal_core::{Entry, EntryQuery, EntryStore, SortOrder, StorageError};

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<Uuid, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Uuid, Entry>>, StorageError> {
        self.entries.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Uuid, Entry>>, StorageError> {
        self.entries.write().map_err(|_| StorageError::Poisoned)
    }
}

impl EntryStore for InMemoryStore {
    fn insert(&self, entry: &Entry) -> Result<(), StorageError> {
        let mut entries = self.write()?;
        if entries.contains_key(&entry.id) {
            return Err(StorageError::Query(format!("duplicate entry id: {}", entry.id)));
        }
        entries.insert(entry.id, entry.clone());
        tracing::debug!(id = %entry.id, "Entry inserted");
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Entry>, StorageError> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Entry>, StorageError> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn query(&self, query: &EntryQuery) -> Result<Vec<Entry>, StorageError> {
        let entries = self.read()?;
        let mut matched: Vec<&Entry> = entries.values().filter(|e| query.matches(e)).collect();
        matched.sort_by_key(|e| (e.created_at, e.id));
        if query.sort == SortOrder::New {
            matched.reverse();
        }
        Ok(matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    fn update(&self, entry: &Entry) -> Result<bool, StorageError> {
        let mut entries = self.write()?;
        match entries.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                tracing::debug!(id = %entry.id, "Entry updated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let removed = self.write()?.remove(&id).is_some();
        if removed {
            tracing::debug!(%id, "Entry deleted");
        }
        Ok(removed)
    }
}
