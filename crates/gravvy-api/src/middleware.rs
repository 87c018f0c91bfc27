use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::convert::Infallible;

use gravvy_db::models::{TokenCheck, UserRow};

use crate::error::ApiError;
use crate::{AppState, db_call};

/// The user behind a valid `Authorization: Token <key>` header. Extracting
/// it rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRow);

/// The authenticated user, if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<UserRow>);

impl MaybeUser {
    pub fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|u| u.id)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(ApiError::not_authenticated)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<CurrentUser>().map(|u| u.0.clone()),
        ))
    }
}

/// Pull the key out of an `Authorization` value. `Ok(None)` means another
/// scheme, which is left for anonymous handling.
fn token_key(value: &str) -> Result<Option<&str>, &'static str> {
    let mut parts = value.split_whitespace();
    match parts.next() {
        Some(scheme) if scheme.eq_ignore_ascii_case("token") => {}
        _ => return Ok(None),
    }
    let key = parts
        .next()
        .ok_or("Invalid token header. No credentials provided.")?;
    if parts.next().is_some() {
        return Err("Invalid token header. Token string should not contain spaces.");
    }
    Ok(Some(key))
}

/// Resolve the token header, if present, into a [`CurrentUser`] extension.
/// A header that is present but invalid fails the request.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::Unauthorized("Invalid token header.".into()))?;
            token_key(value)
                .map_err(|msg| ApiError::Unauthorized(msg.into()))?
                .map(str::to_string)
        }
    };

    if let Some(key) = key {
        let age = state.settings.session_age;
        let check = db_call(&state, move |db| db.authenticate_token(&key, Utc::now(), age)).await?;
        let user = match check {
            TokenCheck::Valid(user) => user,
            TokenCheck::Unknown => return Err(ApiError::Unauthorized("Invalid token".into())),
            TokenCheck::Inactive => {
                return Err(ApiError::Unauthorized("User inactive or deleted".into()));
            }
            TokenCheck::Expired => {
                return Err(ApiError::Unauthorized("Token has expired".into()));
            }
        };
        req.extensions_mut().insert(CurrentUser(user));
    }

    Ok(next.run(req).await)
}
