//! Mutation gateway: every write that other consumers need to hear about.
//!
//! After a successful write the gateway publishes the matching [FeedEvent]
//! and invalidates the affected live query tags. Notification is best effort:
//! a failed publish is logged and never undoes the write.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, error, info};

use super::events::{FEED_TAG, FeedEvent, FeedHub, NEW_LINK, NEW_VOTE};
use crate::db::{CreateLink, CreateUser, Database, LinkRecord, UserRecord, VoteRecord};
use crate::realtime::LiveQueryStore;

#[derive(Clone)]
pub struct MutationGateway {
    db: Database,
    hub: Arc<FeedHub>,
    live_queries: LiveQueryStore,
}

impl MutationGateway {
    pub fn new(db: Database, hub: Arc<FeedHub>, live_queries: LiveQueryStore) -> Self {
        Self {
            db,
            hub,
            live_queries,
        }
    }

    /// Create a link posted by `user`.
    pub async fn post(&self, user: &UserRecord, url: &str, description: &str) -> Result<LinkRecord> {
        let link = self
            .db
            .links()
            .create(CreateLink {
                description: description.to_string(),
                url: url.to_string(),
                posted_by_id: Some(user.id),
            })
            .await?;

        info!(link_id = link.id, user_id = user.id, "Link posted");
        self.notify(
            NEW_LINK,
            FeedEvent::NewLink {
                created_link: link.clone(),
            },
            &[FEED_TAG],
        );

        Ok(link)
    }

    /// Record `user`'s vote for `link_id`. A user votes for a link at most once.
    pub async fn vote(&self, user: &UserRecord, link_id: i64) -> Result<VoteRecord> {
        if self.db.votes().find(link_id, user.id).await?.is_some() {
            bail!("Already voted for link: {link_id}");
        }
        if self.db.links().get_by_id(link_id).await?.is_none() {
            bail!("No such link");
        }

        let vote = self.db.votes().create(link_id, user.id).await?;

        info!(vote_id = vote.id, link_id, user_id = user.id, "Vote recorded");
        self.notify(
            NEW_VOTE,
            FeedEvent::NewVote {
                created_vote: vote.clone(),
            },
            &[FEED_TAG],
        );

        Ok(vote)
    }

    pub async fn signup(&self, name: &str, email: &str) -> Result<UserRecord> {
        let user = self
            .db
            .users()
            .create(CreateUser {
                name: name.to_string(),
                email: email.to_string(),
            })
            .await?;

        info!(user_id = user.id, "User signed up");
        Ok(user)
    }

    fn notify(&self, channel: &str, event: FeedEvent, tags: &[&str]) {
        match self.hub.publish(channel, event) {
            Ok(delivered) => debug!(channel, delivered, "Feed event published"),
            Err(e) => error!(channel, error = %e, "Failed to publish feed event"),
        }

        for tag in tags {
            self.live_queries.invalidate(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::{FutureExt, StreamExt};

    use super::*;
    use crate::realtime::{ChannelHub, ConsumerId, LiveQuery};
    use crate::services::events::{CREATED_VOTE, build_feed_hub};

    async fn setup() -> (MutationGateway, Arc<FeedHub>, LiveQueryStore, UserRecord) {
        let db = Database::in_memory().await.unwrap();
        let hub = Arc::new(build_feed_hub(None));
        let live_queries = LiveQueryStore::new();
        let gateway = MutationGateway::new(db, hub.clone(), live_queries.clone());
        let user = gateway.signup("Alice", "alice@example.com").await.unwrap();
        (gateway, hub, live_queries, user)
    }

    #[tokio::test]
    async fn test_post_publishes_and_invalidates() {
        let (gateway, hub, live_queries, user) = setup().await;
        let mut links = hub.subscribe(NEW_LINK);

        let calls = Arc::new(AtomicUsize::new(0));
        let executor = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move { anyhow::Ok(calls.fetch_add(1, Ordering::SeqCst)) }
            }
        };
        let (_, mut live): (usize, LiveQuery<usize>) = live_queries
            .register(FEED_TAG, executor, ConsumerId::new())
            .await
            .unwrap();

        let link = gateway
            .post(&user, "https://example.com", "An example")
            .await
            .unwrap();
        assert_eq!(link.posted_by_id, Some(user.id));

        assert_eq!(
            links.next().await,
            Some(Ok(FeedEvent::NewLink { created_link: link }))
        );
        let recomputed = tokio::time::timeout(Duration::from_secs(1), live.next())
            .await
            .unwrap();
        assert_matches!(recomputed, Some(Ok(1)));
    }

    #[tokio::test]
    async fn test_repeat_vote_rejected_without_event() {
        let (gateway, hub, _, user) = setup().await;
        let link = gateway.post(&user, "https://a.dev", "a").await.unwrap();
        let mut votes = hub.subscribe(NEW_VOTE);

        let vote = gateway.vote(&user, link.id).await.unwrap();
        assert_eq!(
            votes.next().await,
            Some(Ok(FeedEvent::NewVote { created_vote: vote }))
        );

        let err = gateway.vote(&user, link.id).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Already voted for link: {}", link.id));
        assert!(votes.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_vote_for_missing_link() {
        let (gateway, hub, _, user) = setup().await;
        let mut votes = hub.subscribe(NEW_VOTE);

        let err = gateway.vote(&user, 42).await.unwrap_err();
        assert_eq!(err.to_string(), "No such link");
        assert!(votes.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_write() {
        let db = Database::in_memory().await.unwrap();
        // "newLink" pinned to votes, so publishing a link fails.
        let hub = Arc::new(
            ChannelHub::builder()
                .channel(NEW_LINK, CREATED_VOTE)
                .build(),
        );
        let gateway = MutationGateway::new(db.clone(), hub, LiveQueryStore::new());
        let user = gateway.signup("Bob", "bob@example.com").await.unwrap();

        let link = gateway.post(&user, "https://b.dev", "b").await.unwrap();
        assert!(db.links().get_by_id(link.id).await.unwrap().is_some());
    }
}
