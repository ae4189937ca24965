//! GraphQL subscriptions for real-time updates
//!
//! `newLink` / `newVote` stream hub events; `liveFeed` is the live form of
//! `Query.feed`, re-sent whenever the feed is invalidated.

use std::sync::Arc;

use async_graphql::{Context, Result, Subscription};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::db::Database;
use crate::realtime::{ConsumerId, LiveQueryStore, RealtimeError};
use crate::services::{FEED_TAG, FeedEvent, FeedHub, NEW_LINK, NEW_VOTE};

use super::types::{Feed, Link, LinkOrderByInput, Vote, feed_query};

fn realtime_error(e: RealtimeError) -> async_graphql::Error {
    async_graphql::Error::new(e.to_string())
}

pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Every link posted after subscribing
    async fn new_link<'ctx>(&self, ctx: &Context<'ctx>) -> impl Stream<Item = Result<Link>> + 'ctx {
        let hub = ctx.data_unchecked::<Arc<FeedHub>>();

        hub.subscribe(NEW_LINK).filter_map(|item| match item {
            Ok(FeedEvent::NewLink { created_link }) => Some(Ok(Link::from(created_link))),
            Ok(_) => None,
            Err(e) => Some(Err(realtime_error(e))),
        })
    }

    /// Every vote cast after subscribing
    async fn new_vote<'ctx>(&self, ctx: &Context<'ctx>) -> impl Stream<Item = Result<Vote>> + 'ctx {
        let hub = ctx.data_unchecked::<Arc<FeedHub>>();

        hub.subscribe(NEW_VOTE).filter_map(|item| match item {
            Ok(FeedEvent::NewVote { created_vote }) => Some(Ok(Vote::from(created_vote))),
            Ok(_) => None,
            Err(e) => Some(Err(realtime_error(e))),
        })
    }

    /// The feed now, then again after every change to it
    async fn live_feed<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        filter: Option<String>,
        skip: Option<i32>,
        take: Option<i32>,
        order_by: Option<LinkOrderByInput>,
    ) -> Result<impl Stream<Item = Result<Feed>> + 'ctx> {
        let db = ctx.data_unchecked::<Database>().clone();
        let live_queries = ctx.data_unchecked::<LiveQueryStore>();
        // Outside a WebSocket connection nothing calls release_consumer; the
        // registration is released when this stream is dropped instead.
        let consumer = match ctx.data_opt::<ConsumerId>() {
            Some(consumer) => consumer.clone(),
            None => {
                let consumer = ConsumerId::new();
                debug!(consumer_id = %consumer, "liveFeed without connection consumer");
                consumer
            }
        };
        let query = feed_query(filter, skip, take, order_by);

        let executor = move || {
            let db = db.clone();
            let query = query.clone();
            async move { db.links().feed(&query).await }
        };

        let (initial, updates) = live_queries
            .register(FEED_TAG, executor, consumer)
            .await
            .map_err(realtime_error)?;

        let initial = tokio_stream::once(Ok(Feed::from(initial)));
        let updates = updates.map(|result| result.map(Feed::from).map_err(realtime_error));
        Ok(initial.chain(updates))
    }
}
