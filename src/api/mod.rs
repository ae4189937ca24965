//! REST route definitions
//!
//! The primary API is GraphQL at /graphql; only probes live here.

pub mod health;
