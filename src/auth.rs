use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::Row;

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_ACCOUNTANT: &str = "accountant";

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub role: String,
}

/// Resolve the authenticated user id from the request headers.
///
/// Outside production a `x-user-id` header may stand in for a real token
/// when DEV_AUTH_OVERRIDES_ENABLED is set.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(user_id);
        }
    }

    let claims = decode_claims(state, headers)?;
    Ok(claims.sub)
}

/// Resolve the authenticated user together with their role from `app_users`.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let (user_id, email) = if state.config.auth_dev_overrides_enabled() {
        match header_value(headers, "x-user-id") {
            Some(user_id) => (user_id, None),
            None => {
                let claims = decode_claims(state, headers)?;
                (claims.sub, claims.email)
            }
        }
    } else {
        let claims = decode_claims(state, headers)?;
        (claims.sub, claims.email)
    };

    let role = lookup_role(state, &user_id).await?;
    Ok(AuthUser {
        id: user_id,
        email,
        role,
    })
}

/// Authorize the request for one of the allowed roles.
pub async fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    allowed_roles: &[&str],
) -> Result<AuthUser, AppError> {
    let user = require_user(state, headers).await?;
    if allowed_roles.contains(&user.role.as_str()) {
        return Ok(user);
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: role '{}' is not allowed for this action.",
        user.role
    )))
}

async fn lookup_role(state: &AppState, user_id: &str) -> Result<String, AppError> {
    if let Some(role) = state.user_role_cache.get(user_id).await {
        return Ok(role);
    }

    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let row = sqlx::query("SELECT role::text AS role FROM app_users WHERE id = $1::uuid LIMIT 1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(|error| AppError::Dependency(format!("User lookup failed: {error}")))?;

    let role = row
        .and_then(|row| row.try_get::<String, _>("role").ok())
        .ok_or_else(|| {
            AppError::Forbidden("Forbidden: user has no profile in this system.".to_string())
        })?;

    state
        .user_role_cache
        .insert(user_id.to_string(), role.clone())
        .await;
    Ok(role)
}

fn decode_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims, AppError> {
    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("JWT_SECRET is not configured.".to_string())
    })?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string()))?;

    if decoded.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }
    Ok(decoded.claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};

    use super::{bearer_token, header_value};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic xyz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn trims_header_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("  abc  "));
        assert_eq!(header_value(&headers, "x-user-id"), Some("abc".to_string()));
        assert_eq!(header_value(&headers, "missing"), None);
    }
}
