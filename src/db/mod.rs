//! Database connection and repositories
//!
//! SQLite store for users, links and votes. Each repository is a cheap handle
//! over the shared pool, obtained through [Database].

pub mod links;
pub mod users;
pub mod votes;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

pub use links::{CreateLink, FeedPage, FeedQuery, LinkOrderField, LinkRecord, LinkRepository, SortDirection};
pub use users::{CreateUser, UserRecord, UserRepository};
pub use votes::{VoteRecord, VoteRepository};

/// Tables, created on startup if missing.
const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "links",
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            url TEXT NOT NULL,
            posted_by_id INTEGER REFERENCES users(id),
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "votes",
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            link_id INTEGER NOT NULL REFERENCES links(id),
            user_id INTEGER NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL,
            UNIQUE (link_id, user_id)
        )
        "#,
    ),
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Open a connection pool for `url` (`sqlite::memory:`, `sqlite://path.db`, ...)
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid DATABASE_URL: {url}"))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database,
        // so the pool must hold exactly one and never recycle it.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(Self::get_max_connections())
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!(in_memory, "Database pool opened");
        Ok(Self { pool })
    }

    /// Fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a users repository
    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    /// Get a links repository
    pub fn links(&self) -> LinkRepository {
        LinkRepository::new(self.pool.clone())
    }

    /// Get a votes repository
    pub fn votes(&self) -> VoteRepository {
        VoteRepository::new(self.pool.clone())
    }

    /// Create missing tables
    pub async fn migrate(&self) -> Result<()> {
        for (table, sql) in SCHEMA {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create table {table}"))?;
        }
        info!(tables = SCHEMA.len(), "Database schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("linkfeed.db").display());

        let db = Database::connect(&url).await.unwrap();
        db.migrate().await.unwrap();
        db.users()
            .create(CreateUser {
                name: "Fay".into(),
                email: "fay@example.com".into(),
            })
            .await
            .unwrap();
        db.pool().close().await;

        let reopened = Database::connect(&url).await.unwrap();
        reopened.migrate().await.unwrap();
        assert!(
            reopened
                .users()
                .get_by_email("fay@example.com")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let err = Database::connect("sqlite://linkfeed.db?mode=bogus")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid DATABASE_URL"));
    }
}
