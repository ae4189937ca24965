//! Application services built on top of the store and the real-time core

pub mod events;
pub mod gateway;

pub use events::{
    CREATED_LINK, CREATED_VOTE, FEED_TAG, FeedEvent, FeedHub, NEW_LINK, NEW_VOTE, build_feed_hub,
};
pub use gateway::MutationGateway;
