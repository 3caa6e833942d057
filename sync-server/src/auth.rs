//! Login, refresh-token rotation, and the Bearer-token middleware (§6's
//! auth implementation addition), grounded on this codebase's existing
//! `id_session_token.rs` (Ed25519 JWT issuance) and `id_db.rs` (plain
//! `sqlx::query` access to a Postgres-backed identity table).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use sync_model::actor::{Actor, Role};

const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    role: String,
    iat: i64,
    exp: i64,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
        Role::SuperAdmin => "superadmin",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "admin" => Role::Admin,
        "superadmin" => Role::SuperAdmin,
        _ => Role::User,
    }
}

/// RFC 8410 §10.3's fixed 16-byte PKCS#8 v1 header for an Ed25519 private
/// key, followed by the 32-byte raw seed. `jsonwebtoken`'s `EdDSA` encoder
/// only accepts PKCS#8 DER, not a raw seed, so this is the minimal DER
/// wrapper around the same `LEDGER_SIGN_KEY` seed used everywhere else.
fn ed25519_pkcs8_der(seed: &[u8; 32]) -> Vec<u8> {
    const HEADER: [u8; 16] = [
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
    ];
    let mut der = Vec::with_capacity(48);
    der.extend_from_slice(&HEADER);
    der.extend_from_slice(seed);
    der
}

fn encoding_key(signing_key: &SigningKey) -> EncodingKey {
    EncodingKey::from_ed_der(&ed25519_pkcs8_der(&signing_key.to_bytes()))
}

fn decoding_key(signing_key: &SigningKey) -> DecodingKey {
    DecodingKey::from_ed_der(&signing_key.verifying_key().to_bytes())
}

/// Issue a fresh EdDSA access token for `actor` (§6).
pub fn issue_access_token(signing_key: &SigningKey, actor: &Actor) -> Result<String, ApiError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = Claims {
        sub: actor.user_id.clone(),
        username: actor.username.clone(),
        role: role_str(actor.role).to_string(),
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };
    encode(&Header::new(Algorithm::EdDSA), &claims, &encoding_key(signing_key))
        .map_err(|e| ApiError::StorageUnavailable(format!("token signing failed: {e}")))
}

/// Verify an access token and recover the [`Actor`] it was issued for.
pub fn verify_access_token(signing_key: &SigningKey, token: &str) -> Result<Actor, ApiError> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &decoding_key(signing_key), &validation)
        .map_err(|_| ApiError::Unauthenticated)?;
    Ok(Actor::new(data.claims.sub, data.claims.username, role_from_str(&data.claims.role)))
}

/// The axum middleware guarding `/sync/*` and `/changes/*`: extracts and
/// verifies the Bearer token, inserting the decoded [`Actor`] into request
/// extensions for handlers to pull out via `Extension<Actor>`.
pub async fn require_actor(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated)?;

    let actor = verify_access_token(&state.config.ledger_signing_key, token)?;
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

fn blake3_hash_hex(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize().as_bytes())
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    password_hash: String,
    salt: String,
    role: String,
}

async fn find_user_by_username(pool: &PgPool, username: &str) -> Result<Option<UserRow>, ApiError> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, password_hash, salt, role FROM app_user WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(|e| ApiError::StorageUnavailable(e.to_string()))
}

/// Verify `password` against the stored BLAKE3(salt || password) hash. A
/// deliberately minimal verifier — password-hashing strength is out of scope
/// for this subsystem (§1); only the login contract is this repository's
/// responsibility.
fn verify_password(user: &UserRow, password: &str) -> bool {
    let computed = blake3_hash_hex(&[user.salt.as_bytes(), password.as_bytes()]);
    computed == user.password_hash
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub ok: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserPayload,
    pub permissions: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct UserPayload {
    pub id: String,
    pub username: String,
    pub role: String,
}

fn permissions_for(role: Role) -> Vec<&'static str> {
    match role {
        Role::User => vec!["sync:read", "sync:write"],
        Role::Admin | Role::SuperAdmin => vec!["sync:read", "sync:write", "changes:decide"],
    }
}

/// Insert a new refresh token row under a fresh `family_id` (login) or the
/// presented token's existing `family_id` (refresh rotation). Only the
/// BLAKE3 hash of the opaque token is ever stored.
async fn issue_refresh_token(
    pool: &PgPool,
    actor: &Actor,
    family_id: &str,
    ttl_days: i64,
) -> Result<String, ApiError> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = hex::encode(raw);
    let token_hash = blake3_hash_hex(&[token.as_bytes()]);
    let now = OffsetDateTime::now_utc();
    let expires_at = now + time::Duration::days(ttl_days);

    sqlx::query(
        r#"
        INSERT INTO refresh_token (token_hash, family_id, user_id, username, role, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&token_hash)
    .bind(family_id)
    .bind(&actor.user_id)
    .bind(&actor.username)
    .bind(role_str(actor.role))
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;

    Ok(token)
}

async fn login_response(
    pool: &PgPool,
    signing_key: &SigningKey,
    actor: Actor,
    family_id: &str,
    ttl_days: i64,
) -> Result<AuthResponse, ApiError> {
    let access_token = issue_access_token(signing_key, &actor)?;
    let refresh_token = issue_refresh_token(pool, &actor, family_id, ttl_days).await?;
    let permissions = permissions_for(actor.role);
    Ok(AuthResponse {
        ok: true,
        access_token,
        refresh_token,
        user: UserPayload {
            id: actor.user_id,
            username: actor.username,
            role: role_str(actor.role).to_string(),
        },
        permissions,
    })
}

/// `POST /auth/login`.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = find_user_by_username(&state.pool, &body.username)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !verify_password(&user, &body.password) {
        return Err(ApiError::InvalidCredentials);
    }

    let actor = Actor::new(user.id, user.username, role_from_str(&user.role));
    let family_id = Uuid::new_v4().to_string();
    let response = login_response(
        &state.pool,
        &state.config.ledger_signing_key,
        actor,
        &family_id,
        state.config.refresh_token_ttl_days,
    )
    .await?;
    tracing::info!(username = body.username.as_str(), "login succeeded");
    Ok(Json(response))
}

#[derive(Debug, sqlx::FromRow)]
struct RefreshRow {
    family_id: String,
    user_id: String,
    username: String,
    role: String,
    expires_at: OffsetDateTime,
}

/// `POST /auth/refresh`: validate the presented token against its stored
/// hash, delete it, and issue a new one under the same `family_id`.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let token_hash = blake3_hash_hex(&[body.refresh_token.as_bytes()]);

    let row = sqlx::query_as::<_, RefreshRow>(
        "SELECT family_id, user_id, username, role, expires_at FROM refresh_token WHERE token_hash = $1",
    )
    .bind(&token_hash)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?
    .ok_or(ApiError::InvalidRefreshToken)?;

    if row.expires_at < OffsetDateTime::now_utc() {
        return Err(ApiError::InvalidRefreshToken);
    }

    sqlx::query("DELETE FROM refresh_token WHERE token_hash = $1")
        .bind(&token_hash)
        .execute(&state.pool)
        .await
        .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;

    let actor = Actor::new(row.user_id, row.username, role_from_str(&row.role));
    let response = login_response(
        &state.pool,
        &state.config.ledger_signing_key,
        actor,
        &row.family_id,
        state.config.refresh_token_ttl_days,
    )
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `POST /auth/logout`: revoke the whole rotation family in one statement.
pub async fn logout(
    State(state): State<AppState>,
    Json(body): Json<LogoutRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let token_hash = blake3_hash_hex(&[body.refresh_token.as_bytes()]);

    let family_id: Option<String> =
        sqlx::query("SELECT family_id FROM refresh_token WHERE token_hash = $1")
            .bind(&token_hash)
            .fetch_optional(&state.pool)
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?
            .map(|r| r.get("family_id"));

    if let Some(family_id) = family_id {
        sqlx::query("DELETE FROM refresh_token WHERE family_id = $1")
            .bind(&family_id)
            .execute(&state.pool)
            .await
            .map_err(|e| ApiError::StorageUnavailable(e.to_string()))?;
    }

    Ok(Json(OkResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips_through_sign_and_verify() {
        let (_pubkey, signing_key) = sync_kernel::generate_keypair();
        let actor = Actor::new("u-1", "alice", Role::Admin);
        let token = issue_access_token(&signing_key, &actor).unwrap();
        let recovered = verify_access_token(&signing_key, &token).unwrap();
        assert_eq!(recovered, actor);
    }

    #[test]
    fn verify_rejects_a_token_signed_by_a_different_key() {
        let (_pubkey, signing_key) = sync_kernel::generate_keypair();
        let (_other_pubkey, other_key) = sync_kernel::generate_keypair();
        let actor = Actor::new("u-1", "alice", Role::User);
        let token = issue_access_token(&signing_key, &actor).unwrap();
        assert!(verify_access_token(&other_key, &token).is_err());
    }

    #[test]
    fn verify_password_accepts_correct_and_rejects_wrong() {
        let user = UserRow {
            id: "u-1".into(),
            username: "alice".into(),
            password_hash: blake3_hash_hex(&[b"salt123", b"hunter2"]),
            salt: "salt123".into(),
            role: "user".into(),
        };
        assert!(verify_password(&user, "hunter2"));
        assert!(!verify_password(&user, "wrong"));
    }
}
