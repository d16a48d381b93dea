use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound, in characters, for each of the three text fields.
pub const MAX_FIELD_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateEntryCommand {
    /// What did you work on today?
    pub work: String,
    /// What's one thing you struggled with today?
    pub struggle: String,
    /// What will you study/work on tomorrow?
    pub intention: String,
}

/// Partial update. Absent or `null` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateEntryCommand {
    #[serde(default)]
    pub work: Option<String>,
    #[serde(default)]
    pub struggle: Option<String>,
    #[serde(default)]
    pub intention: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request: {}", describe(.0))]
pub struct ValidationError(pub Vec<FieldError>);

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn check_text(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError {
            field,
            message: "must not be empty".to_string(),
        });
    } else if value.chars().count() > MAX_FIELD_CHARS {
        errors.push(FieldError {
            field,
            message: format!("must be at most {} characters", MAX_FIELD_CHARS),
        });
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), ValidationError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError(errors))
    }
}

impl Validate for CreateEntryCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        check_text("work", &self.work, &mut errors);
        check_text("struggle", &self.struggle, &mut errors);
        check_text("intention", &self.intention, &mut errors);
        finish(errors)
    }
}

impl Validate for UpdateEntryCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        let fields = [
            ("work", &self.work),
            ("struggle", &self.struggle),
            ("intention", &self.intention),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                check_text(field, value, &mut errors);
            }
        }
        finish(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(work: &str) -> CreateEntryCommand {
        CreateEntryCommand {
            work: work.to_string(),
            struggle: "b".to_string(),
            intention: "c".to_string(),
        }
    }

    #[test]
    fn test_create_length_boundary() {
        assert!(create(&"x".repeat(MAX_FIELD_CHARS)).validate().is_ok());

        let err = create(&"x".repeat(MAX_FIELD_CHARS + 1)).validate().unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].field, "work");
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 256 two-byte characters
        assert!(create(&"é".repeat(MAX_FIELD_CHARS)).validate().is_ok());
    }

    #[test]
    fn test_create_rejects_empty_fields() {
        let cmd = CreateEntryCommand {
            work: String::new(),
            struggle: String::new(),
            intention: "c".to_string(),
        };
        let err = cmd.validate().unwrap_err();
        let fields: Vec<_> = err.0.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["work", "struggle"]);
        assert_eq!(
            err.to_string(),
            "invalid request: work: must not be empty; struggle: must not be empty"
        );
    }

    #[test]
    fn test_create_requires_all_fields() {
        let res: Result<CreateEntryCommand, _> =
            serde_json::from_str(r#"{"work":"a","struggle":"b"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_update_accepts_partial_and_null() {
        let cmd: UpdateEntryCommand =
            serde_json::from_str(r#"{"work":"only this","intention":null}"#).unwrap();
        assert_eq!(cmd.work.as_deref(), Some("only this"));
        assert_eq!(cmd.struggle, None);
        assert_eq!(cmd.intention, None);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_update_rejects_unknown_fields() {
        let res: Result<UpdateEntryCommand, _> =
            serde_json::from_str(r#"{"work":"a","mood":"great"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_update_validates_present_fields() {
        let cmd = UpdateEntryCommand {
            struggle: Some("y".repeat(MAX_FIELD_CHARS + 1)),
            ..Default::default()
        };
        let err = cmd.validate().unwrap_err();
        assert_eq!(err.0[0].field, "struggle");
    }
}
