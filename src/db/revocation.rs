//! Revocation ledger for refresh tokens.
//!
//! Refresh tokens are stateless until they are logged out or rotated, at which
//! point their JWT ID is recorded here. A JWT ID can be revoked at most once:
//! the insert is conditional, and the caller learns whether it was the one
//! that revoked it. Rotation relies on this to make a refresh token single-use.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct RevocationLedger {
    pool: SqlitePool,
}

impl RevocationLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check whether a JWT ID has been revoked.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM revoked_tokens WHERE jti = ?")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Revoke a JWT ID.
    ///
    /// Returns `true` if this call recorded the revocation, `false` if the JWT ID
    /// was already revoked. Concurrent callers for the same JWT ID see exactly
    /// one `true`.
    pub async fn revoke(
        &self,
        jti: &str,
        user_id: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO revoked_tokens (jti, user_id, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(jti) DO NOTHING",
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete entries whose token has expired. An expired token fails
    /// verification on its own, so its ledger entry is no longer needed.
    /// Returns the number of entries deleted.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
