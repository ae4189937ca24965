//! GraphQL type definitions
//!
//! Thin views over the store records; relations are resolved lazily from the
//! [Database] in the schema data.

use async_graphql::{ComplexObject, Context, Enum, ID, InputObject, Result, SimpleObject};
use chrono::{DateTime, Utc};

use crate::db::{
    Database, FeedPage, FeedQuery, LinkOrderField, LinkRecord, SortDirection, UserRecord,
    VoteRecord,
};

/// Parse a GraphQL `ID` into a store id
pub fn parse_id(id: &ID) -> Result<i64> {
    id.parse::<i64>()
        .map_err(|_| async_graphql::Error::new(format!("Invalid ID: {}", id.as_str())))
}

fn db_error(e: anyhow::Error) -> async_graphql::Error {
    async_graphql::Error::new(e.to_string())
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct User {
    pub id: ID,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    #[graphql(skip)]
    pub record_id: i64,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: ID(record.id.to_string()),
            name: record.name,
            email: record.email,
            created_at: record.created_at,
            record_id: record.id,
        }
    }
}

#[ComplexObject]
impl User {
    /// Links posted by this user
    async fn links(&self, ctx: &Context<'_>) -> Result<Vec<Link>> {
        let db = ctx.data_unchecked::<Database>();
        let links = db
            .links()
            .list_by_poster(self.record_id)
            .await
            .map_err(db_error)?;
        Ok(links.into_iter().map(Link::from).collect())
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct Link {
    pub id: ID,
    pub description: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[graphql(skip)]
    pub record_id: i64,
    #[graphql(skip)]
    pub posted_by_id: Option<i64>,
}

impl From<LinkRecord> for Link {
    fn from(record: LinkRecord) -> Self {
        Self {
            id: ID(record.id.to_string()),
            description: record.description,
            url: record.url,
            created_at: record.created_at,
            record_id: record.id,
            posted_by_id: record.posted_by_id,
        }
    }
}

#[ComplexObject]
impl Link {
    /// The user who posted this link, if any
    async fn posted_by(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        let Some(user_id) = self.posted_by_id else {
            return Ok(None);
        };
        let db = ctx.data_unchecked::<Database>();
        let user = db.users().get_by_id(user_id).await.map_err(db_error)?;
        Ok(user.map(User::from))
    }

    async fn votes(&self, ctx: &Context<'_>) -> Result<Vec<Vote>> {
        let db = ctx.data_unchecked::<Database>();
        let votes = db
            .votes()
            .list_by_link(self.record_id)
            .await
            .map_err(db_error)?;
        Ok(votes.into_iter().map(Vote::from).collect())
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(complex)]
pub struct Vote {
    pub id: ID,
    pub created_at: DateTime<Utc>,
    #[graphql(skip)]
    pub link_id: i64,
    #[graphql(skip)]
    pub user_id: i64,
}

impl From<VoteRecord> for Vote {
    fn from(record: VoteRecord) -> Self {
        Self {
            id: ID(record.id.to_string()),
            created_at: record.created_at,
            link_id: record.link_id,
            user_id: record.user_id,
        }
    }
}

#[ComplexObject]
impl Vote {
    async fn link(&self, ctx: &Context<'_>) -> Result<Link> {
        let db = ctx.data_unchecked::<Database>();
        db.links()
            .get_by_id(self.link_id)
            .await
            .map_err(db_error)?
            .map(Link::from)
            .ok_or_else(|| async_graphql::Error::new("Link not found"))
    }

    async fn user(&self, ctx: &Context<'_>) -> Result<User> {
        let db = ctx.data_unchecked::<Database>();
        db.users()
            .get_by_id(self.user_id)
            .await
            .map_err(db_error)?
            .map(User::from)
            .ok_or_else(|| async_graphql::Error::new("User not found"))
    }
}

/// One page of the link feed
#[derive(Debug, Clone, SimpleObject)]
pub struct Feed {
    /// Total number of links matching the filter, ignoring skip/take
    pub count: i64,
    pub links: Vec<Link>,
}

impl From<FeedPage> for Feed {
    fn from(page: FeedPage) -> Self {
        Self {
            count: page.count,
            links: page.links.into_iter().map(Link::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[graphql(rename_items = "SCREAMING_SNAKE_CASE")]
pub enum Sort {
    Asc,
    Desc,
}

impl From<Sort> for SortDirection {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::Asc => SortDirection::Asc,
            Sort::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, InputObject)]
pub struct LinkOrderByInput {
    pub description: Option<Sort>,
    pub url: Option<Sort>,
    pub created_at: Option<Sort>,
}

impl LinkOrderByInput {
    fn terms(&self) -> Vec<(LinkOrderField, SortDirection)> {
        [
            (LinkOrderField::Description, self.description),
            (LinkOrderField::Url, self.url),
            (LinkOrderField::CreatedAt, self.created_at),
        ]
        .into_iter()
        .filter_map(|(field, sort)| sort.map(|s| (field, s.into())))
        .collect()
    }
}

/// Arguments shared by `Query.feed` and `Subscription.liveFeed`
pub fn feed_query(
    filter: Option<String>,
    skip: Option<i32>,
    take: Option<i32>,
    order_by: Option<LinkOrderByInput>,
) -> FeedQuery {
    FeedQuery {
        filter,
        skip: skip.map(i64::from),
        take: take.map(i64::from),
        order_by: order_by.map(|o| o.terms()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_order_by_keeps_field_order() {
        let query = feed_query(
            Some("rust".into()),
            Some(5),
            None,
            Some(LinkOrderByInput {
                description: None,
                url: Some(Sort::Desc),
                created_at: Some(Sort::Asc),
            }),
        );

        assert_eq!(
            query,
            FeedQuery {
                filter: Some("rust".into()),
                skip: Some(5),
                take: None,
                order_by: vec![
                    (LinkOrderField::Url, SortDirection::Desc),
                    (LinkOrderField::CreatedAt, SortDirection::Asc),
                ],
            }
        );
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert_eq!(parse_id(&ID::from("12")).unwrap(), 12);
        assert!(parse_id(&ID::from("abc")).is_err());
    }
}
