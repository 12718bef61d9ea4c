//! HTTP bridge between untrusted clients and the broker
//!
//! Exposes the local publish entrypoint and the token service. Neither route
//! ever returns the secret key in a separate field.

use crate::auth::CredentialIssuer;
use crate::gateway::{PublishError, PublishGateway};
use commentbus_client::{Channel, Item, PublishResponse, RealtimeGrant, COMMENTS_PATH, TOKEN_PATH};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bridge server configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Realtime host handed to subscribers inside grants
    pub realtime_host: String,

    /// The one topic this bridge serves
    pub channel: Channel,
}

/// Shared state for bridge handlers
#[derive(Clone)]
pub struct BridgeState {
    pub issuer: Arc<CredentialIssuer>,
    pub gateway: Arc<PublishGateway>,
    pub realtime_host: String,
    pub channel: Channel,
}

impl BridgeState {
    pub fn new(issuer: Arc<CredentialIssuer>, gateway: PublishGateway, realtime_host: String) -> Self {
        let channel = gateway.channel().clone();
        Self {
            issuer,
            gateway: Arc::new(gateway),
            realtime_host,
            channel,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    channel: Option<String>,
}

/// Create the bridge router
pub fn create_router(state: BridgeState) -> Router {
    Router::new()
        .route(COMMENTS_PATH, post(post_comment))
        .route(TOKEN_PATH, get(realtime_token))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn post_comment(
    State(state): State<BridgeState>,
    body: Result<Json<Item>, JsonRejection>,
) -> impl IntoResponse {
    let item = match body {
        Ok(Json(item)) => item,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected malformed comment");
            return (
                rejection.status(),
                Json(PublishResponse::failed("Invalid comment")),
            );
        }
    };

    match state.gateway.publish(&item).await {
        Ok(()) => {
            info!(item_id = item.id, channel = %state.channel, "Comment published");
            (StatusCode::OK, Json(PublishResponse::ok()))
        }
        Err(e @ PublishError::EmptyContent) => {
            debug!(item_id = item.id, "Rejected empty comment");
            (StatusCode::BAD_REQUEST, Json(PublishResponse::failed(e.user_message())))
        }
        Err(e) => {
            warn!(item_id = item.id, error = %e, "Failed to publish comment");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PublishResponse::failed(e.user_message())),
            )
        }
    }
}

async fn realtime_token(
    State(state): State<BridgeState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<RealtimeGrant>, StatusCode> {
    // No channel means the configured one
    let channel = match query.channel {
        Some(name) => Channel::parse(&name).map_err(|_| StatusCode::NOT_FOUND)?,
        None => state.channel.clone(),
    };

    if channel != state.channel {
        debug!(requested = %channel, "Grant requested for unserved channel");
        return Err(StatusCode::NOT_FOUND);
    }

    debug!(channel = %channel, "Issuing realtime grant");
    Ok(Json(state.issuer.grant(&channel, &state.realtime_host)))
}

/// Run the bridge server until the shutdown future resolves
pub async fn run_bridge_server<F>(bind_addr: SocketAddr, state: BridgeState, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Bridge server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
