use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::Entry;

/// Client-facing representation of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    pub id: Uuid,
    pub work: String,
    pub struggle: String,
    pub intention: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Entry> for EntryView {
    fn from(entry: Entry) -> Self {
        Self {
            id: entry.id,
            work: entry.work,
            struggle: entry.struggle,
            intention: entry.intention,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}
