pub mod health;
pub mod todos;
pub mod users;

use actix_web::web;

use crate::auth::AuthMiddleware;
use crate::error::AppError;

/// Registers the user and todo routes.
///
/// `/users` and `/users/login` are public; `/users/me` and everything under
/// `/todos` sit behind `AuthMiddleware`. Malformed JSON bodies are answered
/// with the same `{"error": ...}` shape as every other failure.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .service(
        web::scope("/users")
            .service(users::signup)
            .service(users::login)
            .service(
                web::scope("/me")
                    .wrap(AuthMiddleware)
                    .service(users::me)
                    .service(users::logout)
                    .service(users::delete_account),
            ),
    )
    .service(
        web::scope("/todos")
            .wrap(AuthMiddleware)
            .service(todos::get_todos)
            .service(todos::create_todo)
            .service(todos::get_todo)
            .service(todos::update_todo)
            .service(todos::delete_todo),
    );
}
