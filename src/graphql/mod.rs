//! GraphQL API with subscriptions for real-time updates
//!
//! Queries and mutations run over HTTP POST; subscriptions run over WebSocket
//! (`graphql-transport-ws` or `graphql-ws`). Mutations go through the
//! [MutationGateway](crate::services::MutationGateway), which notifies the
//! channel hub and the live query store.

pub mod auth;
mod schema;
mod subscriptions;
pub mod types;

pub use auth::{
    CurrentUser, USER_ID_HEADER, resolve_current_user, user_id_from_connection_params,
    user_id_from_headers,
};
pub use schema::{LinkfeedSchema, MutationRoot, QueryRoot, build_schema};
pub use subscriptions::SubscriptionRoot;
