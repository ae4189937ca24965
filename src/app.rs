//! Application state and HTTP router construction.
//!
//! Used by `main` and by the integration tests to build the Axum app.

use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLProtocol, GraphQLRequest, GraphQLResponse, GraphQLWebSocket};
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header::ACCEPT};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::api;
use crate::config::Config;
use crate::db::Database;
use crate::graphql::{
    LinkfeedSchema, build_schema, resolve_current_user, user_id_from_connection_params,
    user_id_from_headers,
};
use crate::realtime::{ConsumerId, LiveQueryStore};
use crate::services::{FeedHub, build_feed_hub};

/// Shared state for HTTP handlers (GraphQL, probes).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub schema: LinkfeedSchema,
    pub hub: Arc<FeedHub>,
    pub live_queries: LiveQueryStore,
}

impl AppState {
    /// Construct the hub and live query store and wire them into the schema.
    pub fn new(config: Arc<Config>, db: Database) -> Self {
        let hub = Arc::new(build_feed_hub(config.subscription_queue_cap));
        let live_queries = LiveQueryStore::new();
        let schema = build_schema(
            db.clone(),
            hub.clone(),
            live_queries.clone(),
            !config.is_production(),
        );

        Self {
            config,
            db,
            schema,
            hub,
            live_queries,
        }
    }

    /// Close every subscription and release every live query.
    pub fn shutdown_realtime(&self) {
        self.hub.shutdown();
        self.live_queries.shutdown();
    }
}

/// Build the full Axum router: probes, /graphql, /graphql/ws and layers.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .merge(api::health::router())
        .route("/graphql", get(graphiql).post(graphql_handler))
        .route("/graphql/ws", get(graphql_ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GraphQL query/mutation handler with current-user context
async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let mut request = req.into_inner();

    if let Some(user) = resolve_current_user(&state.db, user_id_from_headers(&headers)).await {
        request = request.data(user);
    }

    state.schema.execute(request).await.into()
}

/// GraphiQL interactive playground (only for browsers)
async fn graphiql(headers: HeaderMap) -> impl IntoResponse {
    let accepts_html = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);

    if accepts_html {
        Html(
            GraphiQLSource::build()
                .endpoint("/graphql")
                .subscription_endpoint("/graphql/ws")
                .finish(),
        )
        .into_response()
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            axum::Json(serde_json::json!({
                "error": "GET requests are not supported for GraphQL queries. Use POST with Content-Type: application/json"
            })),
        )
            .into_response()
    }
}

/// GraphQL WebSocket handler for subscriptions.
///
/// Each connection gets its own [ConsumerId]; its live queries are released
/// when the socket closes.
async fn graphql_ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    protocol: GraphQLProtocol,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let header_user = resolve_current_user(&state.db, user_id_from_headers(&headers)).await;

    ws.protocols(["graphql-transport-ws", "graphql-ws"])
        .on_upgrade(move |socket| async move {
            let consumer = ConsumerId::new();
            let mut data = async_graphql::Data::default();
            data.insert(consumer.clone());
            if let Some(user) = header_user {
                data.insert(user);
            }

            debug!(consumer_id = %consumer, "WebSocket connection opened");

            let db = state.db.clone();
            GraphQLWebSocket::new(socket, state.schema.clone(), protocol)
                .with_data(data)
                .on_connection_init(move |params| async move {
                    let mut data = async_graphql::Data::default();
                    let user_id = user_id_from_connection_params(&params);
                    if let Some(user) = resolve_current_user(&db, user_id).await {
                        data.insert(user);
                    }
                    Ok(data)
                })
                .serve()
                .await;

            let released = state.live_queries.release_consumer(&consumer);
            debug!(consumer_id = %consumer, released, "WebSocket connection closed");
        })
}
