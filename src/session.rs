//! Auth session manager: login, signup, logout and refresh-token rotation.
//!
//! Refresh tokens move through `issued -> rotated` (refresh) or
//! `issued -> revoked` (logout). Both transitions go through the revocation
//! ledger's conditional insert, so a refresh token can be spent at most once.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::db::{Database, is_unique_violation};
use crate::jwt::{IssuedToken, TokenError, TokenIssuer, TokenKind, TokenVerifier};
use crate::keys::KeyPair;
use crate::password::{
    MAX_PASSWORD_BYTES, PasswordError, hash_password_async, verify_password_async,
};

/// Minimum password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Longest email address accepted at signup.
pub const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    /// Unknown user and wrong password are deliberately the same error.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing refresh token")]
    MissingToken,
    #[error("invalid refresh token: {0}")]
    BadToken(TokenError),
    #[error("refresh token has already been revoked")]
    Replay,
    #[error("{context}: {message}")]
    Upstream {
        context: &'static str,
        message: String,
    },
}

impl SessionError {
    fn upstream(context: &'static str, e: impl std::fmt::Display) -> Self {
        Self::Upstream {
            context,
            message: e.to_string(),
        }
    }
}

impl From<PasswordError> for SessionError {
    fn from(e: PasswordError) -> Self {
        Self::upstream("password hashing failed", e)
    }
}

/// Access and refresh token issued together for one user.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub user_id: String,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    keys: KeyPair,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    bcrypt_cost: u32,
    /// Hash checked against on logins for unknown emails, so they cost as
    /// much as logins for known ones.
    dummy_hash: Arc<OnceCell<String>>,
}

impl SessionManager {
    pub fn new(db: Database, keys: KeyPair, bcrypt_cost: u32) -> Self {
        Self {
            issuer: TokenIssuer::new(keys.clone()),
            verifier: TokenVerifier::from_keypair(&keys),
            db,
            keys,
            bcrypt_cost,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// PEM-encoded public key. Served unauthenticated.
    pub fn public_key_pem(&self) -> &[u8] {
        self.keys.public_key_pem()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, SessionError> {
        let email = email.trim();
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(SessionError::InvalidCredentials);
        }

        let user = self
            .db
            .users()
            .get_by_email(email)
            .await
            .map_err(|e| SessionError::upstream("failed to look up user", e))?;

        let Some(user) = user else {
            let dummy = self.dummy_hash().await?;
            verify_password_async(password.to_string(), dummy.to_string()).await?;
            debug!(email = %email, "Login for unknown email");
            return Err(SessionError::InvalidCredentials);
        };

        let matches =
            verify_password_async(password.to_string(), user.password_hash.clone()).await?;
        if !matches {
            debug!(user_id = %user.id, "Login with wrong password");
            return Err(SessionError::InvalidCredentials);
        }

        let pair = self.issue_pair(&user.id)?;
        info!(user_id = %user.id, "User logged in");
        Ok(pair)
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<TokenPair, SessionError> {
        let email = email.trim();
        validate_email(email)?;
        validate_password(password)?;

        let hash = hash_password_async(password.to_string(), self.bcrypt_cost).await?;
        let user_id = uuid::Uuid::new_v4().to_string();

        if let Err(e) = self.db.users().create(&user_id, email, &hash).await {
            if is_unique_violation(&e) {
                return Err(SessionError::Validation(
                    "Email is already registered".to_string(),
                ));
            }
            return Err(SessionError::upstream("failed to create user", e));
        }

        let pair = self.issue_pair(&user_id)?;
        info!(user_id = %user_id, "User signed up");
        Ok(pair)
    }

    /// Revoke the presented refresh token.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), SessionError> {
        let claims = self.verify_refresh(refresh_token)?;
        self.spend(&claims.jti, &claims.sub, claims.exp).await?;
        info!(user_id = %claims.sub, jti = %claims.jti, "User logged out");
        Ok(())
    }

    /// Spend the presented refresh token and issue a fresh pair for the same user.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenPair, SessionError> {
        let claims = self.verify_refresh(refresh_token)?;
        self.spend(&claims.jti, &claims.sub, claims.exp).await?;

        let user = self
            .db
            .users()
            .get_by_id(&claims.sub)
            .await
            .map_err(|e| SessionError::upstream("failed to look up user", e))?;
        if user.is_none() {
            warn!(user_id = %claims.sub, "Refresh for deleted user");
            return Err(SessionError::InvalidCredentials);
        }

        let pair = self.issue_pair(&claims.sub)?;
        debug!(user_id = %claims.sub, old_jti = %claims.jti, new_jti = %pair.refresh.jti, "Rotated refresh token");
        Ok(pair)
    }

    async fn dummy_hash(&self) -> Result<&str, SessionError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| {
                let password = uuid::Uuid::new_v4().to_string();
                hash_password_async(password, self.bcrypt_cost)
            })
            .await?;
        Ok(hash)
    }

    /// A missing cookie is `MissingToken`; a present but empty one is a bad token.
    fn verify_refresh(&self, token: Option<&str>) -> Result<crate::jwt::Claims, SessionError> {
        let token = token.ok_or(SessionError::MissingToken)?;
        if token.is_empty() {
            return Err(SessionError::BadToken(TokenError::Invalid));
        }
        self.verifier
            .verify(token, TokenKind::Refresh)
            .map_err(|e| match e {
                TokenError::Time => SessionError::upstream("clock error", e),
                e => SessionError::BadToken(e),
            })
    }

    /// Revoke a refresh token. Fails with `Replay` unless this call is the one
    /// that revoked it.
    async fn spend(&self, jti: &str, user_id: &str, expires_at: u64) -> Result<(), SessionError> {
        let ledger = self.db.revocations();

        // Cheap early exit; the conditional insert below is what decides races.
        let revoked = ledger
            .is_revoked(jti)
            .await
            .map_err(|e| SessionError::upstream("failed to check revocation", e))?;
        if revoked {
            warn!(user_id = %user_id, jti = %jti, "Revoked refresh token presented again");
            return Err(SessionError::Replay);
        }

        let won = ledger
            .revoke(jti, user_id, expires_at)
            .await
            .map_err(|e| SessionError::upstream("failed to revoke token", e))?;
        if !won {
            warn!(user_id = %user_id, jti = %jti, "Lost race revoking refresh token");
            return Err(SessionError::Replay);
        }
        Ok(())
    }

    fn issue_pair(&self, user_id: &str) -> Result<TokenPair, SessionError> {
        let access = self
            .issuer
            .issue_access(user_id)
            .map_err(|e| SessionError::upstream("failed to issue access token", e))?;
        let refresh = self
            .issuer
            .issue_refresh(user_id)
            .map_err(|e| SessionError::upstream("failed to issue refresh token", e))?;
        Ok(TokenPair {
            user_id: user_id.to_string(),
            access,
            refresh,
        })
    }
}

/// Basic shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn validate_email(email: &str) -> Result<(), SessionError> {
    let invalid = || SessionError::Validation("Invalid email address".to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(invalid());
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), SessionError> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(SessionError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(SessionError::Validation(format!(
            "Password must be at most {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}
