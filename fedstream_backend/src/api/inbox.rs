use super::{ApiError, AppState};
use crate::federation::inbox::{InboxOutcome, InboxService};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Single entry point for inbound federation traffic. The body is taken
/// raw so that malformed JSON is our 422, not the framework's 400.
pub(crate) async fn post_inbox(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let service = InboxService::new(
        state.database.clone(),
        state.resolver.clone(),
        state.codec.clone(),
    );
    let outcome = service.apply(&body).map_err(|err| {
        tracing::debug!(recipient = author_id, error = %err, "inbound activity rejected");
        ApiError::from(err)
    })?;
    match outcome {
        InboxOutcome::LocalLike(like) => Ok((StatusCode::OK, Json(like)).into_response()),
        InboxOutcome::Applied => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub(crate) async fn get_inbox(Path(_author_id): Path<i64>) -> ApiError {
    ApiError::NotImplemented
}

pub(crate) async fn delete_inbox(Path(_author_id): Path<i64>) -> ApiError {
    ApiError::NotImplemented
}
