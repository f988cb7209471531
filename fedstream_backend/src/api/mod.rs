mod authors;
mod follow;
mod inbox;
mod posts;
mod stream;

use crate::config::FedstreamConfig;
use crate::database::Database;
use crate::federation::codec::WireCodec;
use crate::federation::identity::IdentityResolver;
use crate::federation::registry::PeerRegistry;
use crate::federation::FederationError;
use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: FedstreamConfig,
    pub database: Database,
    pub registry: Arc<PeerRegistry>,
    pub codec: WireCodec,
    pub resolver: IdentityResolver,
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// 422 with a `{"detail": ...}` body; part of the inbox wire contract.
    Unprocessable(String),
    /// 501 for operations this protocol revision deliberately leaves open.
    NotImplemented,
    Internal(anyhow::Error),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, serde_json::Value) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"message": msg})),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({"message": msg})),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({"message": msg})),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({"message": msg})),
            ApiError::Unprocessable(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({"detail": detail}))
            }
            ApiError::NotImplemented => (StatusCode::NOT_IMPLEMENTED, json!({})),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"message": "internal server error"}),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_response_parts();
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        match err {
            FederationError::MalformedIdentifier(_) => ApiError::Unprocessable(err.to_string()),
            FederationError::Unprocessable(detail) => ApiError::Unprocessable(detail),
            FederationError::NotImplemented(_) => ApiError::NotImplemented,
            FederationError::Storage(err) => ApiError::Internal(err),
        }
    }
}

/// The `{"type": ..., "items": [...]}` envelope every collection endpoint
/// answers with.
#[derive(Debug, Serialize)]
pub(crate) struct CollectionResponse<T: Serialize> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageParams {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    size: Option<usize>,
}

impl PageParams {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn size(&self) -> usize {
        self.size.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> usize {
        (self.page() - 1) * self.size()
    }
}

pub fn build_http_client(config: &FedstreamConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("Fedstream/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(config.peer_timeout_secs))
        .build()
        .context("failed to build shared HTTP client")
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(stream::health_handler))
        // Canonical read API, also what peers consume.
        .route("/api/v1/authors", get(authors::list_authors))
        .route("/api/v1/authors/:author_id", get(authors::get_author))
        // Peers address inboxes with and without the trailing slash.
        .route(
            "/api/v1/authors/:author_id/inbox",
            post(inbox::post_inbox).get(inbox::get_inbox).delete(inbox::delete_inbox),
        )
        .route(
            "/api/v1/authors/:author_id/inbox/",
            post(inbox::post_inbox).get(inbox::get_inbox).delete(inbox::delete_inbox),
        )
        .route("/api/v1/authors/:author_id/posts", get(authors::list_posts))
        .route("/api/v1/authors/:author_id/posts/:post_id", get(authors::get_post))
        .route(
            "/api/v1/authors/:author_id/posts/:post_id/likes",
            get(authors::list_post_likes),
        )
        .route(
            "/api/v1/authors/:author_id/posts/:post_id/comments",
            get(authors::list_post_comments),
        )
        .route("/api/v1/authors/:author_id/liked", get(authors::list_liked))
        .route("/api/v1/authors/:author_id/followers", get(authors::list_followers))
        .route(
            "/api/v1/authors/:author_id/followers/:follower_id",
            get(authors::get_follower)
                .put(authors::put_follower)
                .delete(authors::delete_follower),
        )
        // Local actions; the acting author is explicit because auth is an
        // external collaborator.
        .route("/authors", post(authors::create_author))
        .route("/stream/:author_id", get(stream::get_stream))
        .route("/remote/posts", get(stream::remote_post_detail))
        .route("/posts/:author_id", post(posts::create_post))
        .route("/posts/:author_id/:post_id/edit", post(posts::edit_post))
        .route("/posts/:author_id/:post_id/delete", post(posts::delete_post))
        .route("/posts/:author_id/:post_id/comments", post(posts::create_comment))
        .route("/posts/:author_id/:post_id/like", post(posts::like_post))
        .route("/posts/:author_id/comments/:comment_id/like", post(posts::like_comment))
        .route(
            "/posts/:author_id/comments/:comment_id/unlike",
            post(posts::unlike_comment),
        )
        .route("/follow/:from_id/request/:to_id", post(follow::create_request))
        .route("/follow/:to_id/accept/:from_id", post(follow::accept_request))
        .route("/follow/:to_id/reject/:from_id", post(follow::reject_request))
        .route("/follow/:from_id/unfollow/:to_id", post(follow::unfollow))
        .route("/follow/:author_id/requests", get(follow::list_requests))
        .route("/follow/:author_id/friends", get(follow::list_friends))
        .route(
            "/follow/:from_id/remote",
            post(follow::remote_follow).delete(follow::remote_unfollow),
        )
        .route("/follow/:to_id/accept-remote", post(follow::accept_remote_request))
        .route("/follow/:to_id/reject-remote", post(follow::reject_remote_request))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve_http(
    config: FedstreamConfig,
    database: Database,
    registry: Arc<PeerRegistry>,
) -> Result<()> {
    let codec = WireCodec::new(&config.public_url);
    let resolver = IdentityResolver::new(&config.public_url)
        .map_err(|err| anyhow::anyhow!("invalid FEDSTREAM_PUBLIC_URL: {err}"))?;
    let state = AppState {
        config: config.clone(),
        database,
        registry,
        codec,
        resolver,
    };

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(?addr, "HTTP server listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
