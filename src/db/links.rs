//! Links repository and feed reads

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LinkRecord {
    pub id: i64,
    pub description: String,
    pub url: String,
    pub posted_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateLink {
    pub description: String,
    pub url: String,
    pub posted_by_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOrderField {
    Description,
    Url,
    CreatedAt,
}

impl LinkOrderField {
    fn column(self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Url => "url",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Arguments of a feed read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    /// Substring matched against description or url
    pub filter: Option<String>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
    /// Applied in order; ties and the default fall back to id ascending
    pub order_by: Vec<(LinkOrderField, SortDirection)>,
}

impl FeedQuery {
    fn order_clause(&self) -> String {
        let mut terms: Vec<String> = self
            .order_by
            .iter()
            .map(|(field, direction)| format!("{} {}", field.column(), direction.keyword()))
            .collect();
        terms.push("id ASC".to_string());
        terms.join(", ")
    }
}

/// One page of the feed plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub links: Vec<LinkRecord>,
    pub count: i64,
}

pub struct LinkRepository {
    pool: SqlitePool,
}

impl LinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: CreateLink) -> Result<LinkRecord> {
        let record = sqlx::query_as::<_, LinkRecord>(
            r#"
            INSERT INTO links (description, url, posted_by_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id, description, url, posted_by_id, created_at
            "#,
        )
        .bind(&input.description)
        .bind(&input.url)
        .bind(input.posted_by_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("Failed to create link")?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<LinkRecord>> {
        let record = sqlx::query_as::<_, LinkRecord>(
            "SELECT id, description, url, posted_by_id, created_at FROM links WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Links posted by one user, oldest first
    pub async fn list_by_poster(&self, user_id: i64) -> Result<Vec<LinkRecord>> {
        let records = sqlx::query_as::<_, LinkRecord>(
            r#"
            SELECT id, description, url, posted_by_id, created_at
            FROM links
            WHERE posted_by_id = ?1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Filtered, ordered, paginated links with the total match count.
    pub async fn feed(&self, query: &FeedQuery) -> Result<FeedPage> {
        let filter = query.filter.as_deref().filter(|f| !f.is_empty());
        let take = query.take.map(|t| t.max(0)).unwrap_or(-1);
        let skip = query.skip.unwrap_or(0).max(0);

        let sql = format!(
            r#"
            SELECT id, description, url, posted_by_id, created_at
            FROM links
            WHERE ?1 IS NULL OR instr(description, ?1) > 0 OR instr(url, ?1) > 0
            ORDER BY {}
            LIMIT ?2 OFFSET ?3
            "#,
            query.order_clause()
        );

        let links = sqlx::query_as::<_, LinkRecord>(&sql)
            .bind(filter)
            .bind(take)
            .bind(skip)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read feed")?;

        let count = self.count(filter).await?;

        Ok(FeedPage { links, count })
    }

    /// Number of links matching `filter`
    pub async fn count(&self, filter: Option<&str>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM links
            WHERE ?1 IS NULL OR instr(description, ?1) > 0 OR instr(url, ?1) > 0
            "#,
        )
        .bind(filter)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::Database;

    async fn seed(db: &Database) {
        for (description, url) in [
            ("Prisma replaces traditional ORMs", "prisma.io"),
            ("GraphQL spec", "graphql.org"),
            ("The best GraphQL client", "apollographql.com"),
        ] {
            db.links()
                .create(CreateLink {
                    description: description.into(),
                    url: url.into(),
                    posted_by_id: None,
                })
                .await
                .unwrap();
        }
    }

    fn urls(page: &FeedPage) -> Vec<&str> {
        page.links.iter().map(|l| l.url.as_str()).collect()
    }

    #[tokio::test]
    async fn test_feed_defaults_to_id_order() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;

        let page = db.links().feed(&FeedQuery::default()).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(urls(&page), vec!["prisma.io", "graphql.org", "apollographql.com"]);
    }

    #[tokio::test]
    async fn test_feed_filter_matches_description_or_url() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;

        let page = db
            .links()
            .feed(&FeedQuery {
                filter: Some("graphql".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        // "GraphQL spec" matches by url only; instr() is case sensitive.
        assert_eq!(page.count, 2);
        assert_eq!(urls(&page), vec!["graphql.org", "apollographql.com"]);
    }

    #[tokio::test]
    async fn test_feed_count_ignores_pagination() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;

        let page = db
            .links()
            .feed(&FeedQuery {
                skip: Some(1),
                take: Some(1),
                order_by: vec![(LinkOrderField::Url, SortDirection::Desc)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(urls(&page), vec!["graphql.org"]);
    }

    #[tokio::test]
    async fn test_list_by_poster() {
        let db = Database::in_memory().await.unwrap();
        let user = db
            .users()
            .create(crate::db::CreateUser {
                name: "Bob".into(),
                email: "bob@example.com".into(),
            })
            .await
            .unwrap();
        seed(&db).await;
        let posted = db
            .links()
            .create(CreateLink {
                description: "mine".into(),
                url: "bob.dev".into(),
                posted_by_id: Some(user.id),
            })
            .await
            .unwrap();

        let links = db.links().list_by_poster(user.id).await.unwrap();
        assert_eq!(links.iter().map(|l| l.id).collect::<Vec<_>>(), vec![posted.id]);
    }
}
