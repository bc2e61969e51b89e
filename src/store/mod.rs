//!
//! # Document Store
//!
//! The persistence seam of the application. Everything the models need from a
//! database is expressed as operations on named collections of JSON documents,
//! selected by a containment filter: a filter matches a document when every
//! field of the filter is present in the document with a matching value.
//!
//! Two backends implement [`DocumentStore`]:
//! - [`PgDocumentStore`] keeps documents as JSONB rows in PostgreSQL and
//!   evaluates filters with the `@>` operator.
//! - [`MemoryStore`] keeps documents in process and evaluates filters with
//!   [`matches`], which follows the same containment rules.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// A JSON object as stored in a collection.
pub type Document = Map<String, Value>;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

lazy_static! {
    // Collection and field names end up in DDL statements, so they are kept to plain identifiers.
    static ref IDENTIFIER_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Errors raised by document-store backends.
#[derive(Debug)]
pub enum StoreError {
    /// A unique index rejected the write. Carries the offending field.
    DuplicateKey(String),
    /// The document, filter or identifier handed to the store is unusable.
    InvalidDocument(String),
    /// The underlying database failed.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::DuplicateKey(field) => write!(f, "Duplicate key for field: {}", field),
            StoreError::InvalidDocument(msg) => write!(f, "Invalid document: {}", msg),
            StoreError::Backend(msg) => write!(f, "Store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> StoreError {
        StoreError::InvalidDocument(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations on collections of JSON documents.
///
/// Filters are JSON objects evaluated by containment (see [`matches`]).
/// Documents are returned in insertion order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a document. The document must carry a string `_id`.
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Document>;

    /// Inserts several documents, in order. Stops at the first failure.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<Document>> {
        let mut inserted = Vec::with_capacity(documents.len());
        for document in documents {
            inserted.push(self.insert_one(collection, document).await?);
        }
        Ok(inserted)
    }

    /// Returns every document matching `filter`.
    async fn find(&self, collection: &str, filter: &Document) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Document)
        -> StoreResult<Option<Document>>;

    /// Merges the top-level fields of `set` into the first document matching
    /// `filter` and returns the updated document. `_id` is never rewritten.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> StoreResult<Option<Document>>;

    /// Appends `value` to the array `field` of the first document matching
    /// `filter` in a single write, creating the array if it is missing or null.
    /// Returns the updated document, or `None` when nothing matches or the
    /// field holds a non-array value.
    async fn push_to_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>>;

    /// Removes every element of the array `field` that contains `value`
    /// from the first document matching `filter`, in a single write.
    /// Returns the updated document, or `None` as for [`Self::push_to_array`].
    async fn pull_from_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>>;

    /// Deletes the first document matching `filter`. Returns the number deleted (0 or 1).
    async fn delete_one(&self, collection: &str, filter: &Document) -> StoreResult<u64>;

    /// Deletes every document matching `filter`. Returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: &Document) -> StoreResult<u64>;

    /// Deletes the first document matching `filter` and returns it.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>>;

    /// Rejects any later write that gives two documents of `collection` the
    /// same non-null value for `field`.
    async fn create_unique_index(&self, collection: &str, field: &str) -> StoreResult<()>;
}

/// Checks that `name` can be used as a collection or field name.
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidDocument(format!(
            "'{}' is not a valid collection or field name",
            name
        )))
    }
}

/// Serializes `value` into a [`Document`]. Fails unless it serializes to a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Deserializes a stored [`Document`] into a typed model.
pub fn from_document<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Filter selecting the document with the given `_id`.
pub fn by_id(id: impl fmt::Display) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    filter
}

/// Returns the `_id` of a document, which must be a string.
pub fn document_id(document: &Document) -> StoreResult<&str> {
    document
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidDocument("document has no string _id".into()))
}

/// Tests whether `document` contains `filter`.
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key).is_some_and(|actual| contains(actual, expected)))
}

/// Key a unique index compares, mirroring PostgreSQL's `body->>'field'`:
/// strings by their content, other values by their JSON text. `None` for null.
pub(crate) fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

// Mirrors JSONB `@>` for nested values.
pub(crate) fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => matches(actual, expected),
        (Value::Array(actual), Value::Array(expected)) => expected
            .iter()
            .all(|wanted| actual.iter().any(|item| contains(item, wanted))),
        (actual, expected) => actual == expected,
    }
}
