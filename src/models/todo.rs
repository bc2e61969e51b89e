use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::store::{to_document, Document, StoreResult};

/// Collection holding todo documents.
pub const COLLECTION: &str = "todos";

/// A todo item as stored in the `todos` collection and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    /// Milliseconds since the Unix epoch; only set while `completed` is true.
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Id of the user who created the todo.
    #[serde(rename = "_creator")]
    pub creator: Uuid,
}

/// Body of `POST /todos`.
#[derive(Debug, Deserialize, Validate)]
pub struct TodoInput {
    /// Trimmed before validation; must not be empty.
    #[validate(length(min = 1, message = "Text must not be empty"))]
    pub text: String,
}

/// Body of `PATCH /todos/{id}`. Keys other than `text` and `completed` are ignored.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct TodoPatch {
    #[validate(length(min = 1, message = "Text must not be empty"))]
    pub text: Option<String>,
    pub completed: Option<bool>,
}

impl TodoInput {
    pub fn normalized(mut self) -> Self {
        self.text = self.text.trim().to_string();
        self
    }
}

impl TodoPatch {
    pub fn normalized(mut self) -> Self {
        self.text = self.text.map(|text| text.trim().to_string());
        self
    }

    /// Builds the fields to merge into the stored document.
    ///
    /// `completed: true` stamps `completedAt` with `now_millis`, `completed: false`
    /// clears it, and an absent `completed` leaves both fields alone.
    pub fn to_update(&self, now_millis: i64) -> Document {
        let mut set = Document::new();
        if let Some(text) = &self.text {
            set.insert("text".into(), Value::String(text.clone()));
        }
        match self.completed {
            Some(true) => {
                set.insert("completed".into(), Value::Bool(true));
                set.insert("completedAt".into(), json!(now_millis));
            }
            Some(false) => {
                set.insert("completed".into(), Value::Bool(false));
                set.insert("completedAt".into(), Value::Null);
            }
            None => {}
        }
        set
    }
}

impl Todo {
    pub fn new(input: TodoInput, creator: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: input.text,
            completed: false,
            completed_at: None,
            creator,
        }
    }

    /// Filter selecting the todo `id` only if it belongs to `creator`.
    pub fn owned_filter(id: Uuid, creator: Uuid) -> StoreResult<Document> {
        to_document(&json!({ "_id": id, "_creator": creator }))
    }

    /// Filter selecting every todo of `creator`.
    pub fn creator_filter(creator: Uuid) -> StoreResult<Document> {
        to_document(&json!({ "_creator": creator }))
    }
}

/// Current time in the unit stored in `completedAt`.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
