use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{hash_password, verify_password, Credentials, TokenIssuer, ACCESS_AUTH};
use crate::error::AppError;
use crate::models::todo;
use crate::store::{by_id, from_document, to_document, DocumentStore, StoreError};

/// Collection holding user documents.
pub const COLLECTION: &str = "users";

const TOKENS_FIELD: &str = "tokens";

/// A token issued to a user, stored on the user document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access: String,
    pub token: String,
}

/// A registered user as stored in the `users` collection.
///
/// `password` always holds a bcrypt hash. Use [`User::to_public`] for anything
/// sent back to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub tokens: Vec<AccessToken>,
}

/// The only view of a user that leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
}

impl User {
    /// Builds a new user from validated credentials, hashing the password.
    pub fn new(credentials: Credentials, bcrypt_cost: u32) -> Result<Self, AppError> {
        let credentials = credentials.normalized();
        credentials.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            email: credentials.email,
            password: hash_password(&credentials.password, bcrypt_cost)?,
            tokens: Vec::new(),
        })
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
        }
    }

    /// Registers a user and issues their first session token.
    ///
    /// The user is stored together with that token in one insert.
    /// Returns `AppError::BadRequest` if the email is already registered.
    pub async fn sign_up(
        store: &dyn DocumentStore,
        issuer: &TokenIssuer,
        credentials: Credentials,
        bcrypt_cost: u32,
    ) -> Result<(User, String), AppError> {
        let mut user = User::new(credentials, bcrypt_cost)?;
        let token = issuer.issue(user.id, ACCESS_AUTH)?;
        user.tokens.push(AccessToken {
            access: ACCESS_AUTH.to_string(),
            token: token.clone(),
        });

        match store.insert_one(COLLECTION, to_document(&user)?).await {
            Ok(_) => Ok((user, token)),
            Err(StoreError::DuplicateKey(_)) => {
                Err(AppError::BadRequest("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Issues a session token and appends it to the stored `tokens`.
    ///
    /// The append is a single store operation, so tokens issued or revoked
    /// concurrently for the same user are kept. `self` is refreshed from the
    /// stored document.
    pub async fn generate_auth_token(
        &mut self,
        store: &dyn DocumentStore,
        issuer: &TokenIssuer,
    ) -> Result<String, AppError> {
        let token = issuer.issue(self.id, ACCESS_AUTH)?;
        let issued = json!({ "access": ACCESS_AUTH, "token": token });

        let updated = store
            .push_to_array(COLLECTION, &by_id(self.id), TOKENS_FIELD, &issued)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        *self = from_document(updated)?;
        Ok(token)
    }

    /// Resolves a session token to the user currently holding it.
    ///
    /// Fails with `AppError::Unauthorized` when the token does not verify.
    /// Returns `Ok(None)` for a well-signed token that is no longer on the
    /// user document (logged out, or the user was deleted).
    pub async fn find_by_token(
        store: &dyn DocumentStore,
        issuer: &TokenIssuer,
        token: &str,
    ) -> Result<Option<User>, AppError> {
        let claims = issuer.verify(token)?;

        let filter = to_document(&json!({
            "_id": claims.sub,
            "tokens": [{ "access": ACCESS_AUTH, "token": token }],
        }))?;
        match store.find_one(COLLECTION, &filter).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    /// Looks a user up by email and checks the password.
    ///
    /// Unknown emails and wrong passwords both yield the same
    /// `AppError::Unauthorized("Invalid credentials")`.
    pub async fn find_by_credentials(
        store: &dyn DocumentStore,
        credentials: Credentials,
    ) -> Result<User, AppError> {
        let credentials = credentials.normalized();
        let filter = to_document(&json!({ "email": credentials.email }))?;

        let user: User = match store.find_one(COLLECTION, &filter).await? {
            Some(document) => from_document(document)?,
            None => return Err(AppError::Unauthorized("Invalid credentials".into())),
        };

        if verify_password(&credentials.password, &user.password)? {
            Ok(user)
        } else {
            Err(AppError::Unauthorized("Invalid credentials".into()))
        }
    }

    /// Revokes `token`, removing every matching entry from the stored `tokens`.
    ///
    /// Only that token is touched; `self` may be stale and is refreshed from
    /// the stored document.
    pub async fn remove_token(
        &mut self,
        store: &dyn DocumentStore,
        token: &str,
    ) -> Result<(), AppError> {
        let updated = store
            .pull_from_array(COLLECTION, &by_id(self.id), TOKENS_FIELD, &json!({ "token": token }))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        *self = from_document(updated)?;
        Ok(())
    }

    /// Deletes the user document and every todo the user created.
    pub async fn delete(&self, store: &dyn DocumentStore) -> Result<u64, AppError> {
        let todos = store
            .delete_many(todo::COLLECTION, &to_document(&json!({ "_creator": self.id }))?)
            .await?;
        let deleted = store.delete_one(COLLECTION, &by_id(self.id)).await?;
        if deleted == 0 {
            return Err(AppError::NotFound("User not found".into()));
        }
        Ok(todos)
    }
}
