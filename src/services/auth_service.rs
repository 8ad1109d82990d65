//! AuthService: verified credential lookup.
//!
//! Tokens come from the backend's login endpoint and are verified once by
//! asking the backend who they belong to. The verified identity is stored
//! under the token's SHA-256 digest; later requests only ever look the digest
//! up. Token contents are never decoded here.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::backend_client::{BackendClient, BackendError, BackendUser, LoginRequest, UserRole};

/// Lifetime of a stored login in days, matching the session cookie.
pub const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("role {} required", .0.as_str())]
    Forbidden(UserRole),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// A caller whose token was found in the verified-token table.
#[derive(Clone, Debug, Serialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    /// Raw token, kept only for forwarding to the backend.
    #[serde(skip)]
    pub token: String,
}

impl AuthUser {
    pub fn require_role(&self, role: UserRole) -> AuthResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AuthError::Forbidden(role))
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    user_id: String,
    email: String,
    name: String,
    role: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthService {
    db: Arc<SqlitePool>,
    backend: BackendClient,
}

impl AuthService {
    pub fn new(db: Arc<SqlitePool>, backend: BackendClient) -> Self {
        Self { db, backend }
    }

    /// Log in through the backend and remember the verified identity.
    pub async fn login(&self, credentials: &LoginRequest) -> AuthResult<AuthUser> {
        let token = self.backend.login(credentials).await?.access_token;
        let user = self.backend.current_user(&token).await?;
        self.remember(&token, &user).await?;
        info!(user_id = %user.user_id, role = user.role.as_str(), "user logged in");
        Ok(AuthUser {
            user_id: user.user_id,
            email: user.email,
            name: user.name,
            role: user.role,
            token,
        })
    }

    /// Store a backend-verified identity under the token digest.
    pub async fn remember(&self, token: &str, user: &BackendUser) -> AuthResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, email, name, role, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(token_hash) DO UPDATE SET
                user_id = excluded.user_id,
                email = excluded.email,
                name = excluded.name,
                role = excluded.role,
                expires_at = excluded.expires_at",
        )
        .bind(token_digest(token))
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(now)
        .bind(now + Duration::days(TOKEN_TTL_DAYS))
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Resolve a token to its verified user; unknown or expired tokens yield `None`.
    pub async fn authenticate(&self, token: &str) -> AuthResult<Option<AuthUser>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT user_id, email, name, role, expires_at FROM auth_tokens WHERE token_hash = ?",
        )
        .bind(token_digest(token))
        .fetch_optional(&*self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        if row.expires_at <= Utc::now() {
            debug!(user_id = %row.user_id, "token expired");
            self.logout(token).await?;
            return Ok(None);
        }
        let Some(role) = UserRole::parse(&row.role) else {
            return Ok(None);
        };

        Ok(Some(AuthUser {
            user_id: row.user_id,
            email: row.email,
            name: row.name,
            role,
            token: token.to_string(),
        }))
    }

    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE token_hash = ?")
            .bind(token_digest(token))
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Drop every expired login. Returns how many were removed.
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
