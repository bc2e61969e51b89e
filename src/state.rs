use std::sync::Arc;

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::models::{todo, user};
use crate::store::{DocumentStore, StoreResult};

/// Shared application state handed to handlers through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub tokens: TokenIssuer,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, tokens: TokenIssuer, bcrypt_cost: u32) -> Self {
        Self {
            store,
            tokens,
            bcrypt_cost,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::new(
            store,
            TokenIssuer::new(&config.jwt_secret, config.token_ttl_hours),
            config.bcrypt_cost,
        )
    }

    /// Creates the indexes the models rely on. Safe to call repeatedly.
    pub async fn prepare(&self) -> StoreResult<()> {
        self.store
            .create_unique_index(user::COLLECTION, "email")
            .await?;
        log::debug!("Collections ready: {}, {}", user::COLLECTION, todo::COLLECTION);
        Ok(())
    }
}
