//! linkfeed - real-time GraphQL API for a link-sharing feed
//!
//! The interesting part lives in [realtime]: a typed channel hub for
//! subscriptions and a live query store that re-pushes query results when
//! their data changes. The remaining modules are the store, the mutation
//! gateway that notifies both, and the GraphQL/HTTP surface.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod graphql;
pub mod realtime;
pub mod services;

pub use app::{AppState, build_app};
