use crate::{
    auth::{AuthenticatedUser, Credentials, AUTH_HEADER},
    error::AppError,
    models::User,
    state::AppState,
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use validator::Validate;

/// Sign up
///
/// Creates a user from `{email, password}` and logs them in.
///
/// ## Responses:
/// - `200 OK`: `{_id, email}` with the session token in the `x-auth` header.
/// - `400 Bad Request`: Malformed body, invalid email, short password, or email already registered.
#[post("")]
pub async fn signup(
    state: web::Data<AppState>,
    credentials: web::Json<Credentials>,
) -> Result<impl Responder, AppError> {
    let (user, token) = User::sign_up(
        state.store.as_ref(),
        &state.tokens,
        credentials.into_inner(),
        state.bcrypt_cost,
    )
    .await?;

    log::info!("Signed up user {}", user.id);
    Ok(HttpResponse::Ok()
        .insert_header((AUTH_HEADER, token))
        .json(user.to_public()))
}

/// Log in
///
/// Checks `{email, password}` and issues a new session token.
///
/// ## Responses:
/// - `200 OK`: `{_id, email}` with the new token in the `x-auth` header.
/// - `400 Bad Request`: Malformed body or invalid email/password format.
/// - `401 Unauthorized`: Unknown email or wrong password.
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    credentials: web::Json<Credentials>,
) -> Result<impl Responder, AppError> {
    let credentials = credentials.into_inner().normalized();
    credentials.validate()?;

    let mut user = User::find_by_credentials(state.store.as_ref(), credentials).await?;
    let token = user
        .generate_auth_token(state.store.as_ref(), &state.tokens)
        .await?;

    log::info!("User {} logged in", user.id);
    Ok(HttpResponse::Ok()
        .insert_header((AUTH_HEADER, token))
        .json(user.to_public()))
}

/// The authenticated user's public profile.
#[get("")]
pub async fn me(auth: AuthenticatedUser) -> impl Responder {
    HttpResponse::Ok().json(auth.user.to_public())
}

/// Log out
///
/// Revokes the token the request was authenticated with. Other sessions stay valid.
#[delete("/token")]
pub async fn logout(
    state: web::Data<AppState>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let AuthenticatedUser { mut user, token } = auth;
    user.remove_token(state.store.as_ref(), &token).await?;

    log::info!("User {} logged out", user.id);
    Ok(HttpResponse::Ok().finish())
}

/// Delete account
///
/// Removes the authenticated user and every todo they created.
#[delete("")]
pub async fn delete_account(
    state: web::Data<AppState>,
    auth: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let removed_todos = auth.user.delete(state.store.as_ref()).await?;

    log::info!(
        "Deleted user {} and {} todo(s)",
        auth.user.id,
        removed_todos
    );
    Ok(HttpResponse::Ok().json(auth.user.to_public()))
}
