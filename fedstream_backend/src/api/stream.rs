use super::{ApiError, ApiResult, AppState, CollectionResponse, PageParams};
use crate::database::repositories::AuthorRepository;
use crate::federation::codec::PostRepr;
use crate::federation::feed::{FeedItem, FeedService};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    api_port: u16,
    public_url: String,
    peers: usize,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        api_port: state.config.api_port,
        public_url: state.config.public_url.clone(),
        peers: state.registry.all_peers().len(),
    })
}

/// The requester's aggregated stream: local posts plus everything the
/// registered peers are serving, one descending timeline.
pub(crate) async fn get_stream(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> ApiResult<CollectionResponse<FeedItem>> {
    let known = state
        .database
        .with_repositories(|repos| Ok(repos.authors().get(author_id)?.is_some()))?;
    if !known {
        return Err(ApiError::NotFound(format!("author {author_id} not found")));
    }

    let feed = FeedService::new(
        state.database.clone(),
        state.registry.clone(),
        state.codec.clone(),
    );
    let items = feed.aggregate(author_id, params.page(), params.size()).await?;
    Ok(Json(CollectionResponse {
        kind: "stream",
        items,
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteDetailParams {
    url: String,
}

/// Live proxy to a remote post's detail; nothing is cached locally beyond
/// the transport's bounded GET cache.
pub(crate) async fn remote_post_detail(
    State(state): State<AppState>,
    Query(params): Query<RemoteDetailParams>,
) -> ApiResult<PostRepr> {
    let feed = FeedService::new(
        state.database.clone(),
        state.registry.clone(),
        state.codec.clone(),
    );
    match feed.remote_detail(&params.url).await {
        Some(post) => Ok(Json(post)),
        None => Err(ApiError::NotFound(format!(
            "no reachable peer serves {}",
            params.url
        ))),
    }
}
