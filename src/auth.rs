use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{Redirect, Response},
    Extension, Form, Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
// password hashing (argon2)
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;

use crate::routes::{notice, AppState, Notice};

/// Authenticated identity, resolved by the middleware and threaded
/// through every protected handler as a request extension.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,
    pub iat: usize,
    pub sub: String, // user id
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResp {
    pub user_id: i64,
    pub message: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResp {
    pub token: String,
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct ChangePasswordForm {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, FromRow)]
struct CredRow {
    id: i64,
    password_hash: String,
}

#[derive(Debug, FromRow)]
struct AuthRow {
    id: i64,
    username: String,
    is_admin: bool,
}

pub async fn register(
    State(state): State<AppState>,
    Form(req): Form<RegisterForm>,
) -> Result<(StatusCode, Json<RegisterResp>), (StatusCode, String)> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณากรอกชื่อผู้ใช้และรหัสผ่าน".to_string(),
        ));
    }
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM user WHERE username = ?")
        .bind(username)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    if existing.is_some() {
        return Err((StatusCode::CONFLICT, "ชื่อผู้ใช้นี้มีอยู่แล้ว".to_string()));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;
    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO user (username, password_hash, is_admin) VALUES (?, ?, 0) RETURNING id",
    )
    .bind(username)
    .bind(password_hash)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResp {
            user_id,
            message: "สมัครสมาชิกเรียบร้อย กรุณาเข้าสู่ระบบ".to_string(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Form(req): Form<LoginForm>,
) -> Result<Json<LoginResp>, (StatusCode, String)> {
    let row: Option<CredRow> =
        sqlx::query_as("SELECT id, password_hash FROM user WHERE username = ?")
            .bind(&req.username)
            .fetch_optional(&state.pool)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "ชื่อผู้ใช้หรือรหัสผ่านไม่ถูกต้อง".to_string(),
        ));
    };
    let is_valid = verify_password(&req.password, &row.password_hash)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("verify error: {e}")))?;
    if !is_valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            "ชื่อผู้ใช้หรือรหัสผ่านไม่ถูกต้อง".to_string(),
        ));
    }

    let token = encode_jwt(row.id)?;
    Ok(Json(LoginResp {
        token,
        user_id: row.id,
    }))
}

// Tokens are stateless; the route exists for parity with the UI flow.
pub async fn logout(Extension(_user): Extension<AuthUser>) -> Redirect {
    Redirect::to("/login")
}

/// Self-service password change, open to every signed-in user
/// (including the primary admin).
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    if form.current_password.is_empty() || form.new_password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณากรอกรหัสผ่านปัจจุบันและรหัสผ่านใหม่".to_string(),
        ));
    }
    let stored_hash: String = sqlx::query_scalar("SELECT password_hash FROM user WHERE id = ?")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let is_valid = verify_password(&form.current_password, &stored_hash)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("verify error: {e}")))?;
    if !is_valid {
        return Err((
            StatusCode::FORBIDDEN,
            "รหัสผ่านปัจจุบันไม่ถูกต้อง".to_string(),
        ));
    }
    let new_hash = hash_password(&form.new_password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;
    sqlx::query("UPDATE user SET password_hash = ? WHERE id = ?")
        .bind(new_hash)
        .bind(user.user_id)
        .execute(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("เปลี่ยนรหัสผ่านเรียบร้อย"))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(
    password: &str,
    stored_hash: &str,
) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(stored_hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn encode_jwt(user_id: i64) -> Result<String, (StatusCode, String)> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "JWT_SECRET not set".into()))?;
    let now = Utc::now();
    let expire = Duration::hours(24);
    let exp = (now + expire).timestamp() as usize;
    let iat = now.timestamp() as usize;

    let claim = Claims {
        sub: user_id.to_string(),
        iat,
        exp,
    };

    encode(
        &Header::default(),
        &claim,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("jwt encode error: {e}"),
        )
    })
}

pub fn decode_jwt(token: &str) -> Result<Claims, (StatusCode, String)> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "JWT_SECRET not set".into()))?;

    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| (StatusCode::UNAUTHORIZED, format!("invalid token: {e}")))?;

    Ok(data.claims)
}

/// Resolves the bearer token to a live user row so privilege toggles
/// take effect immediately, then inserts [`AuthUser`] for handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header".to_string(),
        ))?;

    let token = auth.strip_prefix("Bearer ").ok_or((
        StatusCode::UNAUTHORIZED,
        "Invalid Authorization scheme".to_string(),
    ))?;

    let claims = decode_jwt(token)?;
    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid sub in token".to_string()))?;

    let row: Option<AuthRow> = sqlx::query_as("SELECT id, username, is_admin FROM user WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let Some(row) = row else {
        return Err((StatusCode::UNAUTHORIZED, "unknown user".to_string()));
    };

    req.extensions_mut().insert(AuthUser {
        user_id: row.id,
        username: row.username,
        is_admin: row.is_admin,
    });

    Ok(next.run(req).await)
}
