use std::sync::Arc;

use uuid::Uuid;

use journal_core::{
    now_utc, CreateEntryCommand, Entry, EntryQuery, EntryStore, EntryView, StorageError,
    UpdateEntryCommand,
};

/// Maps between the API schema types and stored entries.
///
/// Not-found is `Ok(None)` / `Ok(false)`; `Err` is reserved for storage failures,
/// which are returned as-is.
pub struct EntryService {
    store: Arc<dyn EntryStore>,
}

impl EntryService {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// Runs a blocking store call off the async workers.
    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&dyn EntryStore) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))?
    }

    pub async fn create(&self, command: CreateEntryCommand) -> Result<EntryView, StorageError> {
        let entry = Entry::new(command, now_utc());
        let entry = self
            .run(move |store| {
                store.insert(&entry)?;
                Ok(entry)
            })
            .await?;
        metrics::increment_counter!("journal_entries_created_total");
        tracing::info!(id = %entry.id, "Entry created");
        Ok(entry.into())
    }

    /// An id that is not a UUID cannot match anything and is reported as not found.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<EntryView>, StorageError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let entry = self.run(move |store| store.get(id)).await?;
        Ok(entry.map(EntryView::from))
    }

    /// Every entry, in no particular order.
    pub async fn list_all(&self) -> Result<Vec<EntryView>, StorageError> {
        let entries = self.run(|store| store.list()).await?;
        Ok(entries.into_iter().map(EntryView::from).collect())
    }

    pub async fn query(&self, query: EntryQuery) -> Result<Vec<EntryView>, StorageError> {
        let entries = self.run(move |store| store.query(&query)).await?;
        Ok(entries.into_iter().map(EntryView::from).collect())
    }

    pub async fn update(
        &self,
        id: &str,
        changes: UpdateEntryCommand,
    ) -> Result<Option<EntryView>, StorageError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let updated = self
            .run(move |store| {
                let Some(mut entry) = store.get(id)? else {
                    return Ok(None);
                };
                entry.apply(changes, now_utc());
                // a concurrent delete between the read and the write also reads as not found
                Ok(store.update(&entry)?.then_some(entry))
            })
            .await?;
        if let Some(entry) = &updated {
            metrics::increment_counter!("journal_entries_updated_total");
            tracing::info!(id = %entry.id, "Entry updated");
        }
        Ok(updated.map(EntryView::from))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let deleted = self.run(move |store| store.delete(id)).await?;
        if deleted {
            metrics::increment_counter!("journal_entries_deleted_total");
            tracing::info!(%id, "Entry deleted");
        }
        Ok(deleted)
    }
}
