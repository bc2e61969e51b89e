use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;

use crate::models::user;
use crate::state::AppState;
use crate::store::by_id;

/// Health check endpoint
///
/// Probes the document store with a cheap lookup. Answers `200` with
/// `{"status": "ok"}` when it responds and `503` with `{"status": "unavailable"}`
/// otherwise. Public; not behind `AuthMiddleware`.
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.store.find_one(user::COLLECTION, &by_id("")).await {
        Ok(_) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "timestamp": Utc::now()
        })),
        Err(e) => {
            log::error!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unavailable",
                "timestamp": Utc::now()
            }))
        }
    }
}
