use super::{ApiError, ApiResult, AppState, CollectionResponse};
use crate::database::repositories::{AuthorRepository, FollowRepository};
use crate::federation::codec::AuthorRepr;
use crate::federation::outbox::{FollowDelivery, OutboxService};
use crate::utils::now_utc_iso;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

pub(crate) async fn create_request(
    State(state): State<AppState>,
    Path((from_id, to_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    if from_id == to_id {
        return Err(ApiError::BadRequest("author cannot follow themselves".into()));
    }

    enum Outcome {
        Created,
        Missing,
        AlreadyFollowing,
        AlreadyRequested,
    }

    let outcome = state.database.with_repositories(|repos| {
        if repos.authors().get(from_id)?.is_none() || repos.authors().get(to_id)?.is_none() {
            return Ok(Outcome::Missing);
        }
        if repos.follows().is_following(from_id, to_id)? {
            return Ok(Outcome::AlreadyFollowing);
        }
        if repos.follows().request_exists(from_id, to_id)? {
            return Ok(Outcome::AlreadyRequested);
        }
        repos.follows().create_request(from_id, to_id, &now_utc_iso())?;
        Ok(Outcome::Created)
    })?;

    match outcome {
        Outcome::Created => Ok(StatusCode::NO_CONTENT),
        Outcome::Missing => Err(ApiError::NotFound("author not found".into())),
        Outcome::AlreadyFollowing => {
            Err(ApiError::Conflict(format!("{from_id} already follows {to_id}")))
        }
        Outcome::AlreadyRequested => Err(ApiError::Conflict(format!(
            "{from_id} already has a pending request to {to_id}"
        ))),
    }
}

/// Consumes the pending request and creates the follow edge. A symmetric
/// pair of edges is what makes two authors true friends; nothing else is
/// recorded.
pub(crate) async fn accept_request(
    State(state): State<AppState>,
    Path((to_id, from_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let accepted = state.database.with_repositories(|repos| {
        if !repos.follows().delete_request(from_id, to_id)? {
            return Ok(false);
        }
        repos.follows().follow(from_id, to_id, &now_utc_iso())?;
        Ok(true)
    })?;
    if !accepted {
        return Err(ApiError::NotFound(format!(
            "no pending request from {from_id} to {to_id}"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn reject_request(
    State(state): State<AppState>,
    Path((to_id, from_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let rejected = state
        .database
        .with_repositories(|repos| repos.follows().delete_request(from_id, to_id))?;
    if !rejected {
        return Err(ApiError::NotFound(format!(
            "no pending request from {from_id} to {to_id}"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn unfollow(
    State(state): State<AppState>,
    Path((from_id, to_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state
        .database
        .with_repositories(|repos| repos.follows().unfollow(from_id, to_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pending requests addressed to a local author. Local requesters appear as
/// full representations; remote requesters are known only by URL until a
/// detail fetch resolves them.
pub(crate) async fn list_requests(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
) -> ApiResult<CollectionResponse<AuthorRepr>> {
    let items = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let mut items = Vec::new();
        for request in repos.follows().requests_for(author_id)? {
            if let Some(from) = repos.authors().get(request.from_id)? {
                items.push(state.codec.encode_author(&from));
            }
        }
        for request in repos.follows().remote_requests_for(author_id)? {
            items.push(AuthorRepr {
                kind: "author".into(),
                id: request.from_url.clone(),
                url: Some(request.from_url),
                host: None,
                display_name: None,
                github: None,
                profile_image: None,
            });
        }
        Ok(Some(items))
    })?;
    let items =
        items.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "requests",
        items,
    }))
}

pub(crate) async fn list_friends(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
) -> ApiResult<CollectionResponse<AuthorRepr>> {
    let items = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let mut items = Vec::new();
        for friend_id in repos.follows().true_friends(author_id)? {
            if let Some(friend) = repos.authors().get(friend_id)? {
                items.push(state.codec.encode_author(&friend));
            }
        }
        Ok(Some(items))
    })?;
    let items =
        items.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "friends",
        items,
    }))
}

/// Kicks off a Follow activity towards the peer owning the remote author.
/// Delivery is fire-and-forget; a target nobody owns is dropped without
/// surfacing an error to the caller.
pub(crate) async fn remote_follow(
    State(state): State<AppState>,
    Path(from_id): Path<i64>,
    Json(object): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let outbox = OutboxService::new(
        state.database.clone(),
        state.registry.clone(),
        state.codec.clone(),
    );
    match outbox.send_follow(from_id, object).await? {
        FollowDelivery::Sent => {}
        FollowDelivery::NoPeer => {
            tracing::warn!(from = from_id, "remote follow target has no registered peer");
        }
    }
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteTargetParams {
    url: String,
}

pub(crate) async fn remote_unfollow(
    State(state): State<AppState>,
    Path(from_id): Path<i64>,
    Query(params): Query<RemoteTargetParams>,
) -> Result<StatusCode, ApiError> {
    let outbox = OutboxService::new(
        state.database.clone(),
        state.registry.clone(),
        state.codec.clone(),
    );
    outbox.remote_unfollow(from_id, &params.url).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepting a remote request records the remote follower edge; the
/// requesting instance is not notified in this protocol revision.
pub(crate) async fn accept_remote_request(
    State(state): State<AppState>,
    Path(to_id): Path<i64>,
    Query(params): Query<RemoteTargetParams>,
) -> Result<StatusCode, ApiError> {
    let accepted = state.database.with_repositories(|repos| {
        if !repos.follows().delete_remote_request(&params.url, to_id)? {
            return Ok(false);
        }
        repos
            .follows()
            .create_remote_follower(&params.url, to_id, &now_utc_iso())?;
        Ok(true)
    })?;
    if !accepted {
        return Err(ApiError::NotFound(format!(
            "no pending remote request from {} to {to_id}",
            params.url
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn reject_remote_request(
    State(state): State<AppState>,
    Path(to_id): Path<i64>,
    Query(params): Query<RemoteTargetParams>,
) -> Result<StatusCode, ApiError> {
    let rejected = state
        .database
        .with_repositories(|repos| repos.follows().delete_remote_request(&params.url, to_id))?;
    if !rejected {
        return Err(ApiError::NotFound(format!(
            "no pending remote request from {} to {to_id}",
            params.url
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}
