//! Feed events and the channel contracts they travel on

use crate::db::{LinkRecord, VoteRecord};
use crate::realtime::{ChannelHub, Payload};

/// Channel carrying every newly posted link
pub const NEW_LINK: &str = "newLink";
/// Channel carrying every newly cast vote
pub const NEW_VOTE: &str = "newVote";

/// Live query tag for the link feed
pub const FEED_TAG: &str = "Query.feed";

pub const CREATED_LINK: &str = "createdLink";
pub const CREATED_VOTE: &str = "createdVote";

/// Events published by the mutation gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    NewLink { created_link: LinkRecord },
    NewVote { created_vote: VoteRecord },
}

impl Payload for FeedEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::NewLink { .. } => CREATED_LINK,
            Self::NewVote { .. } => CREATED_VOTE,
        }
    }
}

pub type FeedHub = ChannelHub<FeedEvent>;

/// Hub with the feed channel contracts declared.
pub fn build_feed_hub(queue_cap: Option<usize>) -> FeedHub {
    ChannelHub::builder()
        .channel(NEW_LINK, CREATED_LINK)
        .channel(NEW_VOTE, CREATED_VOTE)
        .queue_cap(queue_cap)
        .build()
}
