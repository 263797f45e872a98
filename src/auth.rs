//! Credential handling and request guards
//!
//! Guards compose in a fixed order: authenticate (the `AuthAccount`
//! extractor), then `require_role`, then `require_entitlement`. Any
//! failure short-circuits before the handler touches the store.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AuthFailure, Result};
use crate::models::{Account, Role};
use crate::store::Store;
use crate::AppState;

const TOKEN_TTL_HOURS: i64 = 1;

const PASSWORD_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Bearer token claims: account id, role, expiry
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AppError::Internal(format!("Failed to verify password: {}", e))),
    }
}

/// Minimum length 8 plus upper, lower, digit, and symbol classes. The
/// error names the first unmet rule.
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters long.".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(AppError::Validation(
            "Password must contain at least one uppercase letter.".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(AppError::Validation(
            "Password must contain at least one lowercase letter.".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "Password must contain at least one number.".to_string(),
        ));
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        return Err(AppError::Validation(
            "Password must contain at least one special character.".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{} is not a valid email", email)))
    }
}

pub fn issue_token(account: &Account, secret: &str) -> Result<String> {
    let exp = (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp();
    let claims = Claims {
        sub: account.id.to_string(),
        role: account.role.as_str().to_string(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to issue token: {}", e)))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Authentication(AuthFailure::Expired)
        }
        jsonwebtoken::errors::ErrorKind::InvalidSignature => {
            AppError::Authentication(AuthFailure::InvalidSignature)
        }
        _ => AppError::Authentication(AuthFailure::Malformed),
    })
}

/// The authenticated account, resolved from the bearer credential
pub struct AuthAccount(pub Account);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthAccount {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(AppError::Authentication(AuthFailure::Missing))?;
        let header = header
            .to_str()
            .map_err(|_| AppError::Authentication(AuthFailure::Malformed))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Authentication(AuthFailure::Malformed))?;

        let claims = decode_token(token, &state.jwt_secret)?;
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Authentication(AuthFailure::Malformed))?;

        let account = match state.store.get_account(id).await {
            Ok(account) => account,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::Authorization(
                    "Account not found or access denied".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        Ok(AuthAccount(account))
    }
}

pub fn require_role(account: &Account, roles: &[Role]) -> Result<()> {
    if roles.contains(&account.role) {
        return Ok(());
    }
    let allowed = roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::Authorization(format!(
        "Requires one of roles: {}",
        allowed
    )))
}

/// Seed the administrator account used as the allocation fallback.
/// Creation is skipped when any admin already exists; the password is
/// hashed before storage like any other credential.
pub async fn ensure_admin_account(
    store: &Store,
    email: &str,
    password: &str,
) -> Result<Option<Account>> {
    let existing = store.list_accounts_by_role(Role::Admin).await?;
    if let Some(admin) = existing.into_iter().next() {
        tracing::debug!(admin = %admin.email, "Admin account already present");
        return Ok(None);
    }

    let hash = hash_password(password)?;
    let account = store
        .create_account("Admin", email, &hash, Role::Admin, 0)
        .await?;
    tracing::info!(admin = %account.email, "Admin account created");
    Ok(Some(account))
}

/// Entitlement check over fresh data: the account row is re-read so the
/// decision is not made on a stale balance or expiry.
pub async fn require_entitlement(store: &Store, account: &Account) -> Result<Account> {
    let fresh = store.get_account(account.id).await?;
    if fresh.has_entitlement(Utc::now()) {
        Ok(fresh)
    } else {
        Err(AppError::Authorization(
            "Active subscription or remaining credits required".to_string(),
        ))
    }
}
