use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{
    document_id, validate_identifier, Document, DocumentStore, StoreError, StoreResult, ID_FIELD,
};

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> StoreError {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                StoreError::DuplicateKey(
                    db_error
                        .constraint()
                        .unwrap_or("unique constraint")
                        .to_string(),
                )
            }
            _ => StoreError::Backend(error.to_string()),
        }
    }
}

/// [`DocumentStore`] backed by a single PostgreSQL table of JSONB documents.
///
/// Filters are evaluated with JSONB containment (`body @> filter`). Unique
/// indexes are partial expression indexes over `body->>'field'`.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Creates the `documents` table if it does not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_body_idx ON documents USING GIN (body jsonb_path_ops)",
        )
        .execute(&self.pool)
        .await?;
        log::info!("Document table ready");
        Ok(())
    }
}

fn filter_value(filter: &Document) -> Value {
    Value::Object(filter.clone())
}

fn into_document(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "stored body is not an object: {}",
            other
        ))),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<Document> {
        validate_identifier(collection)?;
        let id = document_id(&document)?.to_string();
        log::debug!("pg store: insert {} into {}", id, collection);

        sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Value::Object(document.clone()))
            .execute(&self.pool)
            .await?;
        Ok(document)
    }

    async fn find(&self, collection: &str, filter: &Document) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT body FROM documents
             WHERE collection = $1 AND body @> $2
             ORDER BY created_at, id",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_document).collect()
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT body FROM documents
             WHERE collection = $1 AND body @> $2
             ORDER BY created_at, id
             LIMIT 1",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_document).transpose()
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> StoreResult<Option<Document>> {
        let mut set = set.clone();
        set.remove(ID_FIELD);

        let row = sqlx::query_scalar::<_, Value>(
            "UPDATE documents SET body = body || $3
             WHERE collection = $1 AND id = (
                 SELECT id FROM documents
                 WHERE collection = $1 AND body @> $2
                 ORDER BY created_at, id
                 LIMIT 1
             )
             RETURNING body",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .bind(Value::Object(set))
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_document).transpose()
    }

    async fn push_to_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>> {
        validate_identifier(field)?;

        let row = sqlx::query_scalar::<_, Value>(
            "UPDATE documents SET body = jsonb_set(
                 body,
                 ARRAY[$3::text],
                 CASE WHEN jsonb_typeof(body->$3::text) = 'array' THEN body->$3::text
                      ELSE '[]'::jsonb END || jsonb_build_array($4::jsonb)
             )
             WHERE collection = $1 AND id = (
                 SELECT id FROM documents
                 WHERE collection = $1 AND body @> $2
                 ORDER BY created_at, id
                 LIMIT 1
             )
             AND COALESCE(jsonb_typeof(body->$3::text), 'null') IN ('array', 'null')
             RETURNING body",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .bind(field)
        .bind(value.clone())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_document).transpose()
    }

    async fn pull_from_array(
        &self,
        collection: &str,
        filter: &Document,
        field: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>> {
        validate_identifier(field)?;

        let row = sqlx::query_scalar::<_, Value>(
            "UPDATE documents SET body = jsonb_set(
                 body,
                 ARRAY[$3::text],
                 COALESCE(
                     (SELECT jsonb_agg(item ORDER BY position)
                      FROM jsonb_array_elements(
                          CASE WHEN jsonb_typeof(body->$3::text) = 'array' THEN body->$3::text
                               ELSE '[]'::jsonb END
                      ) WITH ORDINALITY AS items(item, position)
                      WHERE NOT item @> $4::jsonb),
                     '[]'::jsonb
                 )
             )
             WHERE collection = $1 AND id = (
                 SELECT id FROM documents
                 WHERE collection = $1 AND body @> $2
                 ORDER BY created_at, id
                 LIMIT 1
             )
             AND COALESCE(jsonb_typeof(body->$3::text), 'null') IN ('array', 'null')
             RETURNING body",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .bind(field)
        .bind(value.clone())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_document).transpose()
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM documents
             WHERE collection = $1 AND id = (
                 SELECT id FROM documents
                 WHERE collection = $1 AND body @> $2
                 ORDER BY created_at, id
                 LIMIT 1
             )",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_many(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND body @> $2")
            .bind(collection)
            .bind(filter_value(filter))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query_scalar::<_, Value>(
            "DELETE FROM documents
             WHERE collection = $1 AND id = (
                 SELECT id FROM documents
                 WHERE collection = $1 AND body @> $2
                 ORDER BY created_at, id
                 LIMIT 1
             )
             RETURNING body",
        )
        .bind(collection)
        .bind(filter_value(filter))
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_document).transpose()
    }

    async fn create_unique_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        validate_identifier(field)?;

        // DDL cannot take bind parameters; both names passed validate_identifier above.
        let statement = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS documents_{collection}_{field}_key \
             ON documents ((body->>'{field}')) WHERE collection = '{collection}'",
            collection = collection,
            field = field,
        );
        sqlx::query(&statement).execute(&self.pool).await?;
        log::info!("Unique index ensured on {}.{}", collection, field);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{by_id, to_document};
    use serde_json::json;
    use uuid::Uuid;

    async fn connect() -> PgDocumentStore {
        dotenv::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let store = PgDocumentStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    // Requires a running PostgreSQL reachable through DATABASE_URL.
    #[ignore]
    #[actix_rt::test]
    async fn test_round_trip_against_postgres() {
        let store = connect().await;
        let collection = "pg_store_test";
        store
            .delete_many(collection, &Document::new())
            .await
            .unwrap();

        let id = Uuid::new_v4().to_string();
        store
            .insert_one(
                collection,
                to_document(&json!({"_id": id, "text": "Eat lunch", "tags": [{"k": "a"}]})).unwrap(),
            )
            .await
            .unwrap();

        let found = store
            .find(collection, &to_document(&json!({"tags": [{"k": "a"}]})).unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let updated = store
            .find_one_and_update(
                collection,
                &by_id(&id),
                &to_document(&json!({"completedAt": null})).unwrap(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["completedAt"], Value::Null);
        assert_eq!(updated["text"], "Eat lunch");

        let deleted = store.find_one_and_delete(collection, &by_id(&id)).await.unwrap();
        assert!(deleted.is_some());
        assert_eq!(store.delete_one(collection, &by_id(&id)).await.unwrap(), 0);
    }

    // Requires a running PostgreSQL reachable through DATABASE_URL.
    #[ignore]
    #[actix_rt::test]
    async fn test_unique_index_against_postgres() {
        let store = connect().await;
        let collection = "pg_unique_test";
        store
            .delete_many(collection, &Document::new())
            .await
            .unwrap();
        store.create_unique_index(collection, "email").await.unwrap();

        let first = json!({"_id": Uuid::new_v4().to_string(), "email": "a@example.com"});
        let second = json!({"_id": Uuid::new_v4().to_string(), "email": "a@example.com"});
        store
            .insert_one(collection, to_document(&first).unwrap())
            .await
            .unwrap();
        let result = store
            .insert_one(collection, to_document(&second).unwrap())
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
    }

    // Requires a running PostgreSQL reachable through DATABASE_URL.
    #[ignore]
    #[actix_rt::test]
    async fn test_array_push_and_pull_against_postgres() {
        let store = connect().await;
        let collection = "pg_array_test";
        store
            .delete_many(collection, &Document::new())
            .await
            .unwrap();

        let id = Uuid::new_v4().to_string();
        store
            .insert_one(collection, to_document(&json!({"_id": id})).unwrap())
            .await
            .unwrap();

        for token in ["abc", "def", "abc"] {
            store
                .push_to_array(collection, &by_id(&id), "tokens", &json!({"token": token}))
                .await
                .unwrap()
                .unwrap();
        }
        let pulled = store
            .pull_from_array(collection, &by_id(&id), "tokens", &json!({"token": "abc"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pulled["tokens"], json!([{"token": "def"}]));

        let emptied = store
            .pull_from_array(collection, &by_id(&id), "tokens", &json!({"token": "def"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(emptied["tokens"], json!([]));
    }
}
