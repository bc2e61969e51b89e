use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::auth::{extractors::AuthenticatedUser, AUTH_HEADER};
use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

/// Auth check for protected scopes.
///
/// Reads the `x-auth` header, resolves it to a user holding that token and
/// stores an [`AuthenticatedUser`] in the request extensions. Requests without
/// a token, or whose token does not resolve, are rejected with 401 before the
/// wrapped service runs.
pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        let token = req
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let token = token.ok_or_else(|| AppError::Unauthorized("Missing token".into()))?;
            let state = state.ok_or_else(|| {
                AppError::InternalServerError("Application state is not configured".into())
            })?;

            match User::find_by_token(state.store.as_ref(), &state.tokens, &token).await? {
                Some(user) => {
                    req.extensions_mut()
                        .insert(AuthenticatedUser { user, token });
                    service.call(req).await
                }
                None => {
                    log::warn!("Rejected token for {}", req.path());
                    Err(AppError::Unauthorized("Invalid token".into()).into())
                }
            }
        })
    }
}
