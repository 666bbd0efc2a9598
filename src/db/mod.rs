mod revocation;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use revocation::RevocationLedger;
pub use user::{User, UserStore, is_unique_violation};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let (url, max_connections) = if path == ":memory:" {
            // Every connection to sqlite::memory: is a separate database.
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{}?mode=rwc", path), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE users (
                    id TEXT PRIMARY KEY NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                // Revoked refresh tokens. A row only appears once a token is
                // logged out or rotated; expires_at is the token's own exp.
                "CREATE TABLE revoked_tokens (
                    jti TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    revoked_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_revoked_tokens_expires_at ON revoked_tokens(expires_at)",
                "CREATE INDEX idx_revoked_tokens_user_id ON revoked_tokens(user_id)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the revocation ledger.
    pub fn revocations(&self) -> RevocationLedger {
        RevocationLedger::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();

        db.users()
            .create("uuid-123", "alice@example.com", "hash")
            .await
            .unwrap();

        let user = db
            .users()
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, "uuid-123");
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.password_hash, "hash");

        let user = db.users().get_by_id("uuid-123").await.unwrap().unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let db = Database::open(":memory:").await.unwrap();

        db.users()
            .create("uuid-123", "Alice@Example.com", "hash")
            .await
            .unwrap();

        let user = db.users().get_by_email("alice@example.com").await.unwrap();
        assert!(user.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();

        db.users()
            .create("uuid-1", "alice@example.com", "hash")
            .await
            .unwrap();
        let result = db
            .users()
            .create("uuid-2", "ALICE@example.com", "hash")
            .await;

        let err = result.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_unknown_user_is_none() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(db.users().get_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(db.users().get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_file_database_keeps_schema() {
        let path = std::env::temp_dir().join(format!("linkgate-{}.db", uuid::Uuid::new_v4()));
        let path_str = path.to_str().unwrap();

        {
            let db = Database::open(path_str).await.unwrap();
            db.users()
                .create("uuid-1", "alice@example.com", "hash")
                .await
                .unwrap();
            db.pool().close().await;
        }

        let db = Database::open(path_str).await.unwrap();
        assert!(db.users().get_by_id("uuid-1").await.unwrap().is_some());
        db.pool().close().await;

        std::fs::remove_file(&path).ok();
    }
}
