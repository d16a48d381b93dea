use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub mod read;
pub mod write;

use write::{CreateEntryCommand, UpdateEntryCommand};

/// Page size used by listing queries when the caller does not give one.
pub const DEFAULT_LIMIT: u32 = 50;

/// A journal entry as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Uuid,
    pub work: String,
    pub struggle: String,
    pub intention: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Entry {
    /// Builds a new record with a fresh identifier. Both timestamps are `now`.
    pub fn new(command: CreateEntryCommand, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            work: command.work,
            struggle: command.struggle,
            intention: command.intention,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies the fields present in `changes` and refreshes `updated_at`.
    pub fn apply(&mut self, changes: UpdateEntryCommand, now: OffsetDateTime) {
        if let Some(work) = changes.work {
            self.work = work;
        }
        if let Some(struggle) = changes.struggle {
            self.struggle = struggle;
        }
        if let Some(intention) = changes.intention {
            self.intention = intention;
        }
        // updated_at must move forward even when the clock has not
        self.updated_at = now.max(self.updated_at + Duration::microseconds(1));
    }
}

/// Current UTC time truncated to microseconds, the precision every backend keeps.
pub fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest first.
    #[default]
    New,
    /// Oldest first.
    Old,
}

impl SortOrder {
    /// Anything other than `old` sorts newest first.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("old") {
            SortOrder::Old
        } else {
            SortOrder::New
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::New => "DESC",
            SortOrder::Old => "ASC",
        }
    }
}

/// Filtered, sorted and windowed listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub limit: u32,
    pub offset: u32,
    pub q: Option<String>,
    pub sort: SortOrder,
}

impl Default for EntryQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            q: None,
            sort: SortOrder::New,
        }
    }
}

impl EntryQuery {
    /// The text filter, if one is in effect. An empty string filters nothing.
    pub fn filter(&self) -> Option<&str> {
        self.q.as_deref().filter(|q| !q.is_empty())
    }

    /// Case-insensitive substring match across the three text fields.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self.filter() {
            Some(q) => {
                let needle = q.to_lowercase();
                [&entry.work, &entry.struggle, &entry.intention]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }

    /// SQL `LIKE` pattern for the filter, lower-cased, with `\` as the escape character
    /// so that `%` and `_` in the filter match literally.
    pub fn like_pattern(&self) -> Option<String> {
        self.filter().map(|q| {
            let mut pattern = String::with_capacity(q.len() + 2);
            pattern.push('%');
            for c in q.to_lowercase().chars() {
                if matches!(c, '%' | '_' | '\\') {
                    pattern.push('\\');
                }
                pattern.push(c);
            }
            pattern.push('%');
            pattern
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn entry() -> Entry {
        let ts = datetime!(2024-03-01 10:00 UTC);
        Entry {
            id: Uuid::new_v4(),
            work: "Did some cloud learning".to_string(),
            struggle: "Struggled with SQL joins".to_string(),
            intention: "Practice joins tomorrow".to_string(),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut e = entry();
        let before = e.clone();
        let later = before.updated_at + Duration::minutes(5);

        e.apply(
            UpdateEntryCommand {
                work: Some("Updated work".to_string()),
                ..Default::default()
            },
            later,
        );

        assert_eq!(e.work, "Updated work");
        assert_eq!(e.struggle, before.struggle);
        assert_eq!(e.intention, before.intention);
        assert_eq!(e.created_at, before.created_at);
        assert_eq!(e.updated_at, later);
    }

    #[test]
    fn test_apply_advances_updated_at_on_stalled_clock() {
        let mut e = entry();
        let before = e.updated_at;
        e.apply(UpdateEntryCommand::default(), before);
        assert!(e.updated_at > before);
    }

    #[test]
    fn test_now_utc_has_microsecond_precision() {
        assert_eq!(now_utc().nanosecond() % 1_000, 0);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("old"), SortOrder::Old);
        assert_eq!(SortOrder::parse(" OLD "), SortOrder::Old);
        assert_eq!(SortOrder::parse("new"), SortOrder::New);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::New);
    }

    #[test]
    fn test_query_matches_any_field_case_insensitively() {
        let e = entry();
        let query = |q: &str| EntryQuery {
            q: Some(q.to_string()),
            ..Default::default()
        };
        assert!(query("CLOUD").matches(&e));
        assert!(query("sql join").matches(&e));
        assert!(query("tomorrow").matches(&e));
        assert!(!query("kubernetes").matches(&e));
        assert!(query("").matches(&e));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        let query = EntryQuery {
            q: Some("100%_Done\\".to_string()),
            ..Default::default()
        };
        assert_eq!(query.like_pattern().as_deref(), Some("%100\\%\\_done\\\\%"));
        assert_eq!(EntryQuery::default().like_pattern(), None);
    }
}
