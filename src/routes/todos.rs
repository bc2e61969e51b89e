use crate::{
    auth::AuthenticatedUser,
    error::AppError,
    models::{
        todo::{self, now_millis},
        Todo, TodoInput, TodoPatch,
    },
    state::AppState,
    store::{from_document, to_document},
};
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Parses a path id. Anything that is not a valid id is reported as a missing todo.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Todo not found".into()))
}

/// Lists the authenticated user's todos.
///
/// ## Responses:
/// - `200 OK`: `{"todos": [...]}` in creation order.
/// - `401 Unauthorized`: Missing or invalid `x-auth` token.
#[get("")]
pub async fn get_todos(
    state: web::Data<AppState>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let documents = state
        .store
        .find(todo::COLLECTION, &Todo::creator_filter(auth.user.id)?)
        .await?;
    let todos = documents
        .into_iter()
        .map(from_document::<Todo>)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(json!({ "todos": todos })))
}

/// Creates a todo owned by the authenticated user.
///
/// ## Request Body:
/// `{"text": "..."}`; the text is trimmed and must not be empty.
///
/// ## Responses:
/// - `200 OK`: The created todo.
/// - `400 Bad Request`: Missing, empty or blank `text`.
/// - `401 Unauthorized`: Missing or invalid `x-auth` token.
#[post("")]
pub async fn create_todo(
    state: web::Data<AppState>,
    todo_data: web::Json<TodoInput>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let input = todo_data.into_inner().normalized();
    input.validate()?;

    let todo = Todo::new(input, auth.user.id);
    state
        .store
        .insert_one(todo::COLLECTION, to_document(&todo)?)
        .await?;

    log::debug!("User {} created todo {}", auth.user.id, todo.id);
    Ok(HttpResponse::Ok().json(todo))
}

/// Fetches one of the authenticated user's todos.
///
/// ## Responses:
/// - `200 OK`: `{"todo": {...}}`.
/// - `404 Not Found`: Invalid id, unknown todo, or a todo owned by someone else.
#[get("/{id}")]
pub async fn get_todo(
    state: web::Data<AppState>,
    todo_id: web::Path<String>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let id = parse_id(&todo_id)?;

    let document = state
        .store
        .find_one(todo::COLLECTION, &Todo::owned_filter(id, auth.user.id)?)
        .await?
        .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
    let todo: Todo = from_document(document)?;

    Ok(HttpResponse::Ok().json(json!({ "todo": todo })))
}

/// Deletes one of the authenticated user's todos.
///
/// ## Responses:
/// - `200 OK`: `{"todo": {...}}` holding the removed document.
/// - `404 Not Found`: Invalid id, unknown todo, or a todo owned by someone else.
#[delete("/{id}")]
pub async fn delete_todo(
    state: web::Data<AppState>,
    todo_id: web::Path<String>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let id = parse_id(&todo_id)?;

    let document = state
        .store
        .find_one_and_delete(todo::COLLECTION, &Todo::owned_filter(id, auth.user.id)?)
        .await?
        .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
    let todo: Todo = from_document(document)?;

    log::debug!("User {} deleted todo {}", auth.user.id, todo.id);
    Ok(HttpResponse::Ok().json(json!({ "todo": todo })))
}

/// Updates the text and/or completion state of one of the authenticated user's todos.
///
/// ## Request Body:
/// `{"text"?: "...", "completed"?: bool}`; other keys are ignored.
/// Completing a todo stamps `completedAt`; un-completing clears it.
/// A body without `completed` leaves both fields as they are rather than
/// resetting the todo to not completed.
///
/// ## Responses:
/// - `200 OK`: `{"todo": {...}}` holding the updated document.
/// - `400 Bad Request`: `text` present but blank.
/// - `404 Not Found`: Invalid id, unknown todo, or a todo owned by someone else.
#[patch("/{id}")]
pub async fn update_todo(
    state: web::Data<AppState>,
    todo_id: web::Path<String>,
    patch_data: web::Json<TodoPatch>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let id = parse_id(&todo_id)?;
    let patch = patch_data.into_inner().normalized();
    patch.validate()?;

    let document = state
        .store
        .find_one_and_update(
            todo::COLLECTION,
            &Todo::owned_filter(id, auth.user.id)?,
            &patch.to_update(now_millis()),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
    let todo: Todo = from_document(document)?;

    Ok(HttpResponse::Ok().json(json!({ "todo": todo })))
}
