//! JWT token generation and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::keys::KeyPair;

/// Value of the `iss` claim on every token this service signs.
pub const ISSUER: &str = "shortening-api auth service";

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

const ALGORITHM: Algorithm = Algorithm::EdDSA;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived bearer token, never stored server-side
    Access,
    /// Long-lived cookie token, revocable by JTI
    Refresh,
}

impl TokenKind {
    pub fn duration_secs(self) -> u64 {
        match self {
            TokenKind::Access => ACCESS_TOKEN_DURATION_SECS,
            TokenKind::Refresh => REFRESH_TOKEN_DURATION_SECS,
        }
    }
}

/// Registered claims carried by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// JWT ID (revocation key)
    pub jti: String,
    /// Subject (user UUID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Token kind
    #[serde(rename = "typ")]
    pub kind: TokenKind,
}

/// A freshly signed token with the metadata callers need for cookies and logging.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The compact JWT string
    pub token: String,
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Errors that can occur during JWT operations.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("subject must not be empty")]
    InvalidSubject,
    #[error("expiry must be in the future")]
    InvalidExpiry,
    #[error("malformed token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token signature mismatch")]
    Signature,
    #[error("wrong token kind")]
    WrongKind,
    #[error("system time error")]
    Time,
}

/// Current time as Unix seconds.
pub fn now_secs() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::Time)
}

/// Signs tokens with the private half of the keypair.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: KeyPair,
}

impl TokenIssuer {
    pub fn new(keys: KeyPair) -> Self {
        Self { keys }
    }

    /// Issue a token of the given kind for `subject`, expiring at `expires_at`.
    pub fn issue(
        &self,
        subject: &str,
        kind: TokenKind,
        expires_at: u64,
    ) -> Result<IssuedToken, TokenError> {
        let now = now_secs()?;
        self.issue_at(subject, kind, now, expires_at)
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        now: u64,
        expires_at: u64,
    ) -> Result<IssuedToken, TokenError> {
        if subject.is_empty() {
            return Err(TokenError::InvalidSubject);
        }
        if expires_at <= now {
            return Err(TokenError::InvalidExpiry);
        }

        let jti = uuid::Uuid::new_v4().to_string();
        let claims = Claims {
            jti: jti.clone(),
            sub: subject.to_string(),
            iss: ISSUER.to_string(),
            iat: now,
            exp: expires_at,
            kind,
        };

        let token = encode_claims(&claims, self.keys.encoding_key())?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at,
        })
    }

    /// Issue an access token with the standard lifetime.
    pub fn issue_access(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_standard(subject, TokenKind::Access)
    }

    /// Issue a refresh token with the standard lifetime.
    pub fn issue_refresh(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_standard(subject, TokenKind::Refresh)
    }

    fn issue_standard(&self, subject: &str, kind: TokenKind) -> Result<IssuedToken, TokenError> {
        let now = now_secs()?;
        self.issue_at(subject, kind, now, now + kind.duration_secs())
    }
}

pub(crate) fn encode_claims(claims: &Claims, key: &EncodingKey) -> Result<String, TokenError> {
    jsonwebtoken::encode(&Header::new(ALGORITHM), claims, key).map_err(TokenError::Signing)
}

/// Verifies tokens against a public key. Does not consult the revocation ledger.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Arc<DecodingKey>,
}

impl TokenVerifier {
    pub fn new(key: Arc<DecodingKey>) -> Self {
        Self { key }
    }

    pub fn from_keypair(keys: &KeyPair) -> Self {
        Self::new(Arc::new(keys.decoding_key().clone()))
    }

    /// Build a verifier from a PEM-encoded public key, as served by the auth service.
    pub fn from_public_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::new(Arc::new(DecodingKey::from_ed_pem(pem)?)))
    }

    /// Validate `token` and require it to be of `kind`.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        self.verify_at(token, kind, now_secs()?)
    }

    /// Validate `token` as if the current time were `now`.
    ///
    /// A token is expired once `now >= exp`; there is no leeway.
    pub fn verify_at(&self, token: &str, kind: TokenKind, now: u64) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::Signature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;
        let claims = data.claims;

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.sub.is_empty() || claims.jti.is_empty() {
            return Err(TokenError::Invalid);
        }
        if claims.kind != kind {
            return Err(TokenError::WrongKind);
        }

        Ok(claims)
    }
}
