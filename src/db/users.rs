//! Users repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. Fails if the email is already registered.
    pub async fn create(&self, input: CreateUser) -> Result<UserRecord> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (name, email, created_at)
            VALUES (?1, ?2, ?3)
            RETURNING id, name, email, created_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.email)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create user with email {}", input.email))?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, created_at FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_email_is_unique() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();

        let alice = users
            .create(CreateUser {
                name: "Alice".into(),
                email: "alice@example.com".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            users.get_by_id(alice.id).await.unwrap().map(|u| u.name),
            Some("Alice".to_string())
        );
        assert_eq!(
            users.get_by_email("alice@example.com").await.unwrap().map(|u| u.id),
            Some(alice.id)
        );

        let duplicate = users
            .create(CreateUser {
                name: "Other".into(),
                email: "alice@example.com".into(),
            })
            .await;
        assert!(duplicate.is_err());
    }
}
