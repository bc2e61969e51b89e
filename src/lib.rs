#![doc = "The `todoapp` library crate."]
#![doc = ""]
#![doc = "This crate contains the document-store seam and its backends, the user and todo"]
#![doc = "models, token authentication, routing configuration, and error handling for the"]
#![doc = "TodoApp server. It is used by the `todoapp` binary to run the HTTP API and by"]
#![doc = "`todoapp-admin` for ad-hoc deletions."]

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;

pub use crate::error::AppError;
pub use crate::state::AppState;
