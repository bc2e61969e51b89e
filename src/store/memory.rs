use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{
    contains, document_id, index_key, matches, validate_identifier, Document, DocumentStore,
    StoreError, StoreResult, ID_FIELD,
};

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    unique_fields: Vec<String>,
}

impl Collection {
    /// Fails if `candidate` would collide on a unique field with any document
    /// other than the one at `skip`.
    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> StoreResult<()> {
        for field in &self.unique_fields {
            let key = match candidate.get(field).and_then(index_key) {
                Some(key) => key,
                None => continue,
            };
            let taken = self.documents.iter().enumerate().any(|(index, existing)| {
                Some(index) != skip && existing.get(field).and_then(index_key).as_ref() == Some(&key)
            });
            if taken {
                return Err(StoreError::DuplicateKey(field.clone()));
            }
        }
        Ok(())
    }

    fn position(&self, filter: &Document) -> Option<usize> {
        self.documents.iter().position(|document| matches(document, filter))
    }

    /// Applies `change` to the array `field` of the first match, all under the caller's write lock.
    fn update_array<F>(
        &mut self,
        filter: &Document,
        field: &str,
        change: F,
    ) -> StoreResult<Option<Document>>
    where
        F: FnOnce(&mut Vec<Value>),
    {
        let index = match self.position(filter) {
            Some(index) => index,
            None => return Ok(None),
        };
        let document = &mut self.documents[index];
        let slot = document
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => change(items),
            _ => return Ok(None),
        }
        Ok(Some(document.clone()))
    }
}

/// In-process [`DocumentStore`].
///
/// Used when the server runs without `DATABASE_URL` and throughout the test suite.
/// Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Document> {
        validate_identifier(collection)?;
        let id = document_id(&document)?.to_string();

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        if entry
            .documents
            .iter()
            .any(|existing| existing.get(ID_FIELD) == document.get(ID_FIELD))
        {
            return Err(StoreError::DuplicateKey(ID_FIELD.into()));
        }
        entry.check_unique(&document, None)?;

        log::debug!("memory store: insert {} into {}", id, collection);
        entry.documents.push(document.clone());
        Ok(document)
    }

    async fn find(&self, collection: &str, filter: &Document) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|entry| {
                entry
                    .documents
                    .iter()
                    .filter(|document| matches(document, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|entry| {
            entry
                .documents
                .iter()
                .find(|document| matches(document, filter))
                .cloned()
        }))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> StoreResult<Option<Document>> {
        let mut collections = self.collections.write().await;
        let entry = match collections.get_mut(collection) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let index = match entry.position(filter) {
            Some(index) => index,
            None => return Ok(None),
        };

        let mut updated = entry.documents[index].clone();
        for (key, value) in set.iter().filter(|(key, _)| key.as_str() != ID_FIELD) {
            updated.insert(key.clone(), value.clone());
        }
        entry.check_unique(&updated, Some(index))?;

        entry.documents[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn push_to_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>> {
        validate_identifier(field)?;
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(entry) => entry.update_array(filter, field, |items| items.push(value.clone())),
            None => Ok(None),
        }
    }

    async fn pull_from_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>> {
        validate_identifier(field)?;
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(entry) => {
                entry.update_array(filter, field, |items| items.retain(|item| !contains(item, value)))
            }
            None => Ok(None),
        }
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        Ok(self
            .find_one_and_delete(collection, filter)
            .await?
            .map_or(0, |_| 1))
    }

    async fn delete_many(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        let mut collections = self.collections.write().await;
        let entry = match collections.get_mut(collection) {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let before = entry.documents.len();
        entry.documents.retain(|document| !matches(document, filter));
        Ok((before - entry.documents.len()) as u64)
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let mut collections = self.collections.write().await;
        Ok(collections.get_mut(collection).and_then(|entry| {
            entry
                .position(filter)
                .map(|index| entry.documents.remove(index))
        }))
    }

    async fn create_unique_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        validate_identifier(field)?;

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.unique_fields.iter().any(|existing| existing == field) {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for key in entry
            .documents
            .iter()
            .filter_map(|document| document.get(field).and_then(index_key))
        {
            if !seen.insert(key) {
                return Err(StoreError::DuplicateKey(field.to_string()));
            }
        }
        entry.unique_fields.push(field.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{by_id, to_document};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        to_document(&value).unwrap()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "todos",
                vec![
                    doc(json!({"_id": "1", "text": "Eat lunch", "completed": false})),
                    doc(json!({"_id": "2", "text": "Walk dog", "completed": true})),
                    doc(json!({"_id": "3", "text": "Eat lunch", "completed": true})),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[actix_rt::test]
    async fn test_find_preserves_insertion_order() {
        let store = seeded().await;
        let all = store.find("todos", &Document::new()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let lunch = store
            .find("todos", &doc(json!({"text": "Eat lunch"})))
            .await
            .unwrap();
        assert_eq!(lunch.len(), 2);
    }

    #[actix_rt::test]
    async fn test_find_in_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nothing", &Document::new()).await.unwrap().is_empty());
        assert!(store.find_one("nothing", &by_id("1")).await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn test_insert_requires_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let missing = store.insert_one("todos", doc(json!({"text": "x"}))).await;
        assert!(matches!(missing, Err(StoreError::InvalidDocument(_))));

        store
            .insert_one("todos", doc(json!({"_id": "1"})))
            .await
            .unwrap();
        let again = store.insert_one("todos", doc(json!({"_id": "1"}))).await;
        assert!(matches!(again, Err(StoreError::DuplicateKey(field)) if field == "_id"));
    }

    #[actix_rt::test]
    async fn test_find_one_and_update_merges_fields() {
        let store = seeded().await;
        let updated = store
            .find_one_and_update(
                "todos",
                &by_id("2"),
                &doc(json!({"completed": false, "completedAt": null, "_id": "hijack"})),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            Value::Object(updated),
            json!({"_id": "2", "text": "Walk dog", "completed": false, "completedAt": null})
        );
        let missing = store
            .find_one_and_update("todos", &by_id("404"), &doc(json!({"text": "x"})))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[actix_rt::test]
    async fn test_delete_operations() {
        let store = seeded().await;

        let removed = store
            .find_one_and_delete("todos", &doc(json!({"completed": true})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed["_id"], "2");

        assert_eq!(store.delete_one("todos", &by_id("404")).await.unwrap(), 0);
        assert_eq!(
            store
                .delete_many("todos", &doc(json!({"text": "Eat lunch"})))
                .await
                .unwrap(),
            2
        );
        assert!(store.find("todos", &Document::new()).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_unique_index_on_insert_and_update() {
        let store = MemoryStore::new();
        store.create_unique_index("users", "email").await.unwrap();
        store
            .insert_one("users", doc(json!({"_id": "a", "email": "a@example.com"})))
            .await
            .unwrap();
        store
            .insert_one("users", doc(json!({"_id": "b", "email": "b@example.com"})))
            .await
            .unwrap();
        store
            .insert_one("users", doc(json!({"_id": "c"})))
            .await
            .unwrap();
        store
            .insert_one("users", doc(json!({"_id": "d", "email": null})))
            .await
            .unwrap();

        let duplicate = store
            .insert_one("users", doc(json!({"_id": "e", "email": "a@example.com"})))
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey(field)) if field == "email"));

        let clash = store
            .find_one_and_update("users", &by_id("b"), &doc(json!({"email": "a@example.com"})))
            .await;
        assert!(matches!(clash, Err(StoreError::DuplicateKey(_))));

        // Rewriting a document's own value is not a collision.
        let same = store
            .find_one_and_update("users", &by_id("a"), &doc(json!({"email": "a@example.com"})))
            .await
            .unwrap();
        assert!(same.is_some());
    }

    #[actix_rt::test]
    async fn test_unique_index_rejects_existing_duplicates() {
        let store = seeded().await;
        let result = store.create_unique_index("todos", "text").await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert!(store.create_unique_index("todos", "bad name").await.is_err());
    }

    #[actix_rt::test]
    async fn test_unique_index_compares_text_values() {
        let store = MemoryStore::new();
        store.create_unique_index("users", "code").await.unwrap();
        store
            .insert_one("users", doc(json!({"_id": "a", "code": 1})))
            .await
            .unwrap();

        let clash = store
            .insert_one("users", doc(json!({"_id": "b", "code": "1"})))
            .await;
        assert!(matches!(clash, Err(StoreError::DuplicateKey(field)) if field == "code"));

        let mixed = MemoryStore::new();
        mixed
            .insert_many(
                "users",
                vec![
                    doc(json!({"_id": "a", "code": true})),
                    doc(json!({"_id": "b", "code": "true"})),
                ],
            )
            .await
            .unwrap();
        assert!(matches!(
            mixed.create_unique_index("users", "code").await,
            Err(StoreError::DuplicateKey(_))
        ));
    }

    #[actix_rt::test]
    async fn test_push_and_pull_array_elements() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "users",
                vec![
                    doc(json!({"_id": "u1"})),
                    doc(json!({"_id": "u2", "tokens": null})),
                    doc(json!({"_id": "u3", "tokens": "oops"})),
                ],
            )
            .await
            .unwrap();

        for token in ["abc", "def", "abc"] {
            store
                .push_to_array("users", &by_id("u1"), "tokens", &json!({"access": "auth", "token": token}))
                .await
                .unwrap()
                .unwrap();
        }
        let pushed = store
            .push_to_array("users", &by_id("u2"), "tokens", &json!({"token": "x"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed["tokens"], json!([{"token": "x"}]));

        let pulled = store
            .pull_from_array("users", &by_id("u1"), "tokens", &json!({"token": "abc"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pulled["tokens"], json!([{"access": "auth", "token": "def"}]));

        assert!(store
            .push_to_array("users", &by_id("missing"), "tokens", &json!(1))
            .await
            .unwrap()
            .is_none());
        // A non-array field is left alone.
        assert!(store
            .push_to_array("users", &by_id("u3"), "tokens", &json!(1))
            .await
            .unwrap()
            .is_none());
        let untouched = store.find_one("users", &by_id("u3")).await.unwrap().unwrap();
        assert_eq!(untouched["tokens"], "oops");
    }

    #[actix_rt::test]
    async fn test_concurrent_pushes_all_land() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store
            .insert_one("users", doc(json!({"_id": "u1", "tokens": []})))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .push_to_array("users", &by_id("u1"), "tokens", &json!({"token": n}))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let user = store.find_one("users", &by_id("u1")).await.unwrap().unwrap();
        assert_eq!(user["tokens"].as_array().unwrap().len(), 16);
    }
}
