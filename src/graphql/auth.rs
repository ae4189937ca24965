//! Current-user context for GraphQL operations
//!
//! The client names itself by numeric user id: the `x-user-id` header on HTTP
//! requests and WebSocket upgrades, or `userId` in the WebSocket
//! `connection_init` payload. The id is looked up in the store and the
//! resulting [CurrentUser] is attached to the request data. No credentials are
//! checked here.

use async_graphql::{Context, ErrorExtensions, Result};
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::db::{Database, UserRecord};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The user on whose behalf an operation runs
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

/// Read the user id from request headers
pub fn user_id_from_headers(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read `userId` from a WebSocket `connection_init` payload (number or string)
pub fn user_id_from_connection_params(params: &serde_json::Value) -> Option<i64> {
    match params.get("userId")? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Look up the current user; unknown ids and store errors leave the request anonymous.
pub async fn resolve_current_user(db: &Database, user_id: Option<i64>) -> Option<CurrentUser> {
    let user_id = user_id?;
    match db.users().get_by_id(user_id).await {
        Ok(Some(user)) => Some(CurrentUser(user)),
        Ok(None) => {
            debug!(user_id, "Unknown user id, continuing unauthenticated");
            None
        }
        Err(e) => {
            warn!(user_id, error = %e, "Failed to resolve current user");
            None
        }
    }
}

/// Extension trait to get the current user from GraphQL context
pub trait AuthExt {
    /// The current user, or an `UNAUTHENTICATED` error carrying `message`
    fn require_user(&self, message: &str) -> Result<&UserRecord>;

    fn current_user(&self) -> Option<&UserRecord>;
}

impl<'a> AuthExt for Context<'a> {
    fn require_user(&self, message: &str) -> Result<&UserRecord> {
        self.current_user().ok_or_else(|| {
            async_graphql::Error::new(message).extend_with(|_, e| e.set("code", "UNAUTHENTICATED"))
        })
    }

    fn current_user(&self) -> Option<&UserRecord> {
        self.data_opt::<CurrentUser>().map(|user| &user.0)
    }
}
