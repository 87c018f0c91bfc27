use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;
use tracing::{info, warn};

use gravvy_db::models::{TokenRow, UserRow};
use gravvy_db::registration::Activation;
use gravvy_notify::Delivery;
use gravvy_types::PhoneNumber;
use gravvy_types::api::{
    ActivateRequest, Detail, ObtainTokenRequest, RegisterRequest, TokenResponse, UserCreated,
};

use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::{AppState, db_call};

const BAD_CREDENTIALS: &str = "Unable to login with provided credentials.";

/// Hash a password with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Unusable (`!`-prefixed) and malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if hash.starts_with('!') {
        return false;
    }
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Validate the `phone_number` / `password` pair shared by the account forms.
fn credentials(phone_number: &str, password: &str) -> ApiResult<PhoneNumber> {
    let phone = PhoneNumber::parse(phone_number);
    let mut errors = FieldErrors::new();
    if let Err(e) = &phone {
        errors.add("phone_number", e.to_string());
    }
    if password.is_empty() {
        errors.add("password", "This field may not be blank.");
    }
    errors.into_result()?;
    phone.map_err(|e| ApiError::field("phone_number", e.to_string()))
}

fn send_verification_code(state: &AppState, user: &UserRow, code: u32) {
    let delivery = Delivery::Sms {
        to: user.phone_number.clone(),
        body: format!("Your Gravvy code is {}. Use this to verify your device.", code),
    };
    let transport = state.transport.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.deliver(&delivery).await {
            warn!("Failed to send verification code: {:#}", e);
        }
    });
}

/// `POST /users/`: create (or re-issue the code of) an inactive account.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserCreated>)> {
    let Json(req) = payload?;
    let phone = credentials(&req.phone_number, &req.password)?;

    let digits = state.settings.verification_code_len;
    let password = req.password;
    let (user, profile) = db_call(&state, move |db| {
        let hash = hash_password(&password)?;
        db.register_inactive_user(&phone, &hash, digits, Utc::now())
    })
    .await?;

    info!("Registration requested for user {}", user.id);
    send_verification_code(&state, &user, profile.verification_code);

    Ok((
        StatusCode::CREATED,
        Json(UserCreated {
            url: state.user_url(&user),
            id: user.id,
            phone_number: user.phone_number,
        }),
    ))
}

enum Login {
    Rejected,
    Disabled,
    Granted(TokenRow),
}

/// `POST /account/auth/`: exchange credentials for a token, refreshing an
/// expired one.
pub async fn obtain_token(
    State(state): State<AppState>,
    payload: Result<Json<ObtainTokenRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(req) = payload?;
    let phone = credentials(&req.phone_number, &req.password)?;

    let age = state.settings.session_age;
    let password = req.password;
    let login = db_call(&state, move |db| {
        let user = match db.get_user_by_phone(&phone)? {
            Some(user) if verify_password(&password, &user.password) => user,
            _ => return Ok(Login::Rejected),
        };
        if !user.is_active {
            return Ok(Login::Disabled);
        }
        Ok(Login::Granted(db.obtain_token(user.id, Utc::now(), age)?))
    })
    .await?;

    match login {
        Login::Granted(token) => Ok(Json(TokenResponse { token: token.key })),
        Login::Disabled => Err(ApiError::non_field("User account is disabled.")),
        Login::Rejected => Err(ApiError::non_field(BAD_CREDENTIALS)),
    }
}

/// `POST /account/activate/`: check the verification code and set the
/// account's password.
pub async fn activate(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> ApiResult<Json<Detail<bool>>> {
    let Json(req) = payload?;
    let phone = credentials(&req.phone_number, &req.password)?;

    let days = state.settings.activation_days;
    let code = req.verification_code;
    let password = req.password;
    let outcome = db_call(&state, move |db| {
        let Some(user) = db.get_user_by_phone(&phone)? else {
            return Ok(Err(BAD_CREDENTIALS));
        };
        if db.get_registration_profile(user.id)?.is_none() {
            return Ok(Err("Must register before attempting activation."));
        }
        let hash = hash_password(&password)?;
        Ok(Ok(db.activate_user(user.id, code, &hash, days, Utc::now())?))
    })
    .await?;

    match outcome {
        Ok(Activation::Activated) => Ok(Json(Detail { detail: true })),
        Ok(other) => {
            info!("Activation refused: {:?}", other);
            Err(ApiError::BadRequest("Could not activate user.".into()))
        }
        Err(msg) => Err(ApiError::non_field(msg)),
    }
}
