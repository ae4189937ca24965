//! GraphQL schema definition with queries, mutations, and subscriptions

use std::sync::Arc;

use async_graphql::extensions::Tracing;
use async_graphql::{Context, ID, Object, Result, Schema};

use crate::db::Database;
use crate::realtime::LiveQueryStore;
use crate::services::{FeedHub, MutationGateway};

use super::auth::AuthExt;
use super::subscriptions::SubscriptionRoot;
use super::types::*;

/// The GraphQL schema type
pub type LinkfeedSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

/// Build the GraphQL schema. The hub, live query store and database are shared
/// with the mutation gateway stored alongside them in the schema data.
pub fn build_schema(
    db: Database,
    hub: Arc<FeedHub>,
    live_queries: LiveQueryStore,
    introspection: bool,
) -> LinkfeedSchema {
    let gateway = MutationGateway::new(db.clone(), hub.clone(), live_queries.clone());

    let builder = Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .extension(Tracing)
        .data(db)
        .data(hub)
        .data(live_queries)
        .data(gateway);

    if introspection {
        builder.finish()
    } else {
        builder.disable_introspection().finish()
    }
}

// ============================================================================
// Query Root
// ============================================================================

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn info(&self) -> String {
        "This is the API of a Hackernews Clone".to_string()
    }

    /// Links, optionally filtered by a substring of description or url
    async fn feed(
        &self,
        ctx: &Context<'_>,
        filter: Option<String>,
        skip: Option<i32>,
        take: Option<i32>,
        order_by: Option<LinkOrderByInput>,
    ) -> Result<Feed> {
        let db = ctx.data_unchecked::<Database>();
        let page = db
            .links()
            .feed(&feed_query(filter, skip, take, order_by))
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(page.into())
    }

    /// The current user
    async fn me(&self, ctx: &Context<'_>) -> Result<User> {
        let user = ctx.require_user("Unauthenticated!")?;
        Ok(User::from(user.clone()))
    }
}

// ============================================================================
// Mutation Root
// ============================================================================

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Post a new link as the current user
    async fn post(&self, ctx: &Context<'_>, url: String, description: String) -> Result<Link> {
        let user = ctx.require_user("Unauthenticated!")?;
        let gateway = ctx.data_unchecked::<MutationGateway>();
        let link = gateway
            .post(user, &url, &description)
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(link.into())
    }

    /// Upvote a link as the current user (once per link)
    async fn vote(&self, ctx: &Context<'_>, link_id: ID) -> Result<Vote> {
        let user = ctx.require_user("You must login in order to use upvote!")?;
        let link_id = parse_id(&link_id)?;
        let gateway = ctx.data_unchecked::<MutationGateway>();
        let vote = gateway
            .vote(user, link_id)
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(vote.into())
    }

    async fn signup(&self, ctx: &Context<'_>, name: String, email: String) -> Result<User> {
        let gateway = ctx.data_unchecked::<MutationGateway>();
        let user = gateway
            .signup(&name, &email)
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(user.into())
    }
}
