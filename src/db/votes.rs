//! Votes repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoteRecord {
    pub id: i64,
    pub link_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

pub struct VoteRepository {
    pool: SqlitePool,
}

impl VoteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a vote. The store rejects a second vote for the same pair.
    pub async fn create(&self, link_id: i64, user_id: i64) -> Result<VoteRecord> {
        let record = sqlx::query_as::<_, VoteRecord>(
            r#"
            INSERT INTO votes (link_id, user_id, created_at)
            VALUES (?1, ?2, ?3)
            RETURNING id, link_id, user_id, created_at
            "#,
        )
        .bind(link_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to record vote for link {link_id}"))?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<VoteRecord>> {
        let record = sqlx::query_as::<_, VoteRecord>(
            "SELECT id, link_id, user_id, created_at FROM votes WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// The vote `user_id` cast for `link_id`, if any
    pub async fn find(&self, link_id: i64, user_id: i64) -> Result<Option<VoteRecord>> {
        let record = sqlx::query_as::<_, VoteRecord>(
            r#"
            SELECT id, link_id, user_id, created_at
            FROM votes
            WHERE link_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(link_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn list_by_link(&self, link_id: i64) -> Result<Vec<VoteRecord>> {
        let records = sqlx::query_as::<_, VoteRecord>(
            "SELECT id, link_id, user_id, created_at FROM votes WHERE link_id = ?1 ORDER BY id",
        )
        .bind(link_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
