use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::validation::{Validate, ValidationErrors, optional_max, required_max};

pub const TITLE_MAX_CHARS: usize = 100;
pub const NOTES_MAX_CHARS: usize = 1000;

/// A stored Todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TodoItem {
    /// Builds a new, incomplete item with a fresh id.
    pub fn new(title: impl Into<String>, notes: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            notes,
            is_complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Weak validator derived from the last modification time.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.updated_at.unix_timestamp_nanos())
    }

    /// Applies an update and bumps `updated_at`.
    pub fn apply(&mut self, update: UpdateTodo) {
        self.title = update.title.trim().to_string();
        self.notes = update.notes;
        self.is_complete = update.is_complete;
        self.touch();
    }

    /// Moves `updated_at` forward, never backwards, so the ETag always changes.
    pub fn touch(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + time::Duration::nanoseconds(1)
        };
    }
}

/// Payload for `POST /api/v1/todos`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateTodo {
    pub fn into_item(self) -> TodoItem {
        TodoItem::new(self.title.trim(), self.notes)
    }
}

impl Validate for CreateTodo {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        required_max(&mut errors, "title", &self.title, TITLE_MAX_CHARS);
        optional_max(&mut errors, "notes", self.notes.as_deref(), NOTES_MAX_CHARS);
        errors.into_result()
    }
}

/// Payload for `PUT /api/v1/todos/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
}

impl Validate for UpdateTodo {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        required_max(&mut errors, "title", &self.title, TITLE_MAX_CHARS);
        optional_max(&mut errors, "notes", self.notes.as_deref(), NOTES_MAX_CHARS);
        if self.is_complete && self.notes.as_deref().is_none_or(|n| n.trim().is_empty()) {
            errors.add("notes", "Notes required when marking complete.");
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_trims_title() {
        let item = CreateTodo {
            title: "  buy milk ".into(),
            notes: None,
        }
        .into_item();
        assert_eq!(item.title, "buy milk");
        assert!(!item.is_complete);
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn create_rejects_blank_and_long_fields() {
        let dto = CreateTodo {
            title: " ".into(),
            notes: Some("n".repeat(NOTES_MAX_CHARS + 1)),
        };
        let errors = dto.validate().unwrap_err();
        assert!(errors.field("title").is_some());
        assert!(errors.field("notes").is_some());

        let dto = CreateTodo {
            title: "t".repeat(TITLE_MAX_CHARS + 1),
            notes: None,
        };
        assert!(dto.validate().unwrap_err().field("title").is_some());
    }

    #[test]
    fn update_requires_notes_when_complete() {
        let dto = UpdateTodo {
            title: "done".into(),
            notes: None,
            is_complete: true,
        };
        let errors = dto.validate().unwrap_err();
        assert_eq!(
            errors.field("notes").unwrap(),
            ["Notes required when marking complete."]
        );

        let dto = UpdateTodo {
            notes: Some("shipped".into()),
            ..dto
        };
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn etag_changes_on_update() {
        let mut item = TodoItem::new("a", None);
        let before = item.etag();
        item.apply(UpdateTodo {
            title: "b".into(),
            notes: None,
            is_complete: false,
        });
        assert_ne!(before, item.etag());
        assert!(item.etag().starts_with("W/\""));
    }

    #[test]
    fn serializes_camel_case() {
        let item = TodoItem::new("a", None);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["title"], "a");
        assert_eq!(json["isComplete"], false);
        assert!(json.get("notes").is_none());
        assert!(json["createdAt"].is_string());

        let back: TodoItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, item.id);
    }
}
