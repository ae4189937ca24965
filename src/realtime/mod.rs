//! Real-time event distribution core
//!
//! Two independent mechanisms push changes to long-lived consumers:
//!
//! - [ChannelHub] / [Subscription]: typed publish/subscribe. A publisher
//!   hands an event to a named channel; every subscription currently bound to
//!   it receives a clone, in publish order.
//! - [LiveQueryStore] / [LiveQuery]: tag-based invalidation. A consumer
//!   registers a query under a tag; invalidating the tag re-runs the query and
//!   pushes the new result, coalescing bursts of invalidations.
//!
//! Both are plain values constructed at startup and shared by injection.

mod error;
mod hub;
mod live_query;
mod subscription;

pub use error::RealtimeError;
pub use hub::{ChannelHub, ChannelHubBuilder, HubConfig, Payload};
pub use live_query::{ConsumerId, LiveQuery, LiveQueryStore, QueryExecutor, RegistrationId};
pub use subscription::{Subscription, SubscriptionId};
