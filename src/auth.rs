use crate::extractor::{AuthUser, Claims, SESSION_COOKIE};
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{error, info};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub name: String,
}

/// Display name used when none is given at registration: the local part of the email.
pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn validate_registration(payload: &RegisterRequest) -> AppResult<(String, String)> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest("email and password are required".into()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("invalid email address".into()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_display_name(email));
    Ok((email.to_string(), name))
}

pub fn issue_token(user_id: i32, email: &str, now: DateTime<Utc>) -> AppResult<String> {
    let exp = now
        .checked_add_signed(Duration::hours(*crate::config::SESSION_TTL_HOURS))
        .ok_or_else(|| AppError::Message("token expiry overflow".into()))?
        .timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

fn session_cookie(value: String) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        value
            .parse()
            .map_err(|_| AppError::Message("invalid cookie header".into()))?,
    );
    Ok(headers)
}

pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let (email, name) = validate_registration(&payload)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&email)
    .bind(&name)
    .bind(hash.to_string())
    .fetch_one(&mut tx)
    .await;
    let user_id: i32 = match inserted {
        Ok(row) => row.get("id"),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_email_key") {
                    return Err(AppError::BadRequest("Email already registered".into()));
                }
            }
            return Err(AppError::Db(e));
        }
    };
    sqlx::query(
        "INSERT INTO usage_stats (user_id, measurements_this_month, exports_this_month) VALUES ($1, 0, 0)",
    )
    .bind(user_id)
    .execute(&mut tx)
    .await?;
    tx.commit().await?;

    info!(%user_id, "registered user");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created", "userId": user_id })),
    ))
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, &'static str)> {
    let rec = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = $1")
        .bind(payload.email.trim())
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user");
            AppError::Db(e)
        })?;
    let rec = rec.ok_or(AppError::Unauthorized)?;
    let id: i32 = rec.get("id");
    let email: String = rec.get("email");
    let pass_hash: String = rec.get("password_hash");
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }
    let token = issue_token(id, &email, Utc::now())?;
    let headers = session_cookie(format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Path=/"
    ))?;
    Ok((headers, "Login successful"))
}

pub async fn logout_user() -> AppResult<(HeaderMap, &'static str)> {
    let headers = session_cookie(format!("{SESSION_COOKIE}=deleted; HttpOnly; Path=/; Max-Age=0"))?;
    Ok((headers, "Logged out"))
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let rec = sqlx::query("SELECT email, name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user");
            AppError::Db(e)
        })?;
    let Some(row) = rec else {
        return Err(AppError::NotFound);
    };
    Ok(Json(UserInfo {
        id: user_id,
        email: row.get("email"),
        name: row.get("name"),
    }))
}
