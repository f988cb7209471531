use super::authors::encode_post_in_repos;
use super::{ApiError, ApiResult, AppState};
use crate::database::models::NewPost;
use crate::database::repositories::{
    AuthorRepository, CommentRepository, LikeRepository, PostRepository,
};
use crate::federation::codec::{CommentRepr, ContentKind, LikeRepr, LikeTarget, PostRepr, Visibility};
use crate::utils::now_utc_iso;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct CreatePostRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    content_type: Option<String>,
    content: String,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    unlisted: bool,
    #[serde(default)]
    categories: Vec<String>,
}

fn validated_content_type(raw: Option<&str>) -> Result<&'static str, ApiError> {
    let raw = raw.unwrap_or("text/plain");
    ContentKind::parse(raw)
        .map(|kind| kind.as_str())
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported content type `{raw}`")))
}

fn validated_visibility(raw: Option<&str>) -> Result<&'static str, ApiError> {
    let raw = raw.unwrap_or("PUBLIC");
    Visibility::parse(raw)
        .map(|visibility| visibility.as_str())
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported visibility `{raw}`")))
}

pub(crate) async fn create_post(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<PostRepr> {
    let content_type = validated_content_type(payload.content_type.as_deref())?;
    let visibility = validated_visibility(payload.visibility.as_deref())?;

    let repr = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let post = repos.posts().create(
            &NewPost {
                author_id,
                title: payload.title.clone(),
                description: payload.description.clone(),
                content_type: content_type.to_string(),
                content: payload.content.clone(),
                visibility: visibility.to_string(),
                unlisted: payload.unlisted,
            },
            &now_utc_iso(),
        )?;
        repos.posts().set_categories(post.id, &payload.categories)?;
        encode_post_in_repos(&state.codec, &repos, &post)
    })?;
    let repr = repr.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    tracing::info!(author = author_id, "created post");
    Ok(Json(repr))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EditPostRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    unlisted: Option<bool>,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

/// Posts are mutated only by their owning local author; a remote activity
/// can never reach this path.
pub(crate) async fn edit_post(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
    Json(payload): Json<EditPostRequest>,
) -> ApiResult<PostRepr> {
    let content_type = payload
        .content_type
        .as_deref()
        .map(|raw| validated_content_type(Some(raw)))
        .transpose()?;
    let visibility = payload
        .visibility
        .as_deref()
        .map(|raw| validated_visibility(Some(raw)))
        .transpose()?;

    enum Outcome {
        Done(PostRepr),
        Missing,
        NotOwner,
    }

    let outcome = state.database.with_repositories(|repos| {
        let Some(mut post) = repos.posts().get(post_id)? else {
            return Ok(Outcome::Missing);
        };
        if post.author_id != author_id {
            return Ok(Outcome::NotOwner);
        }
        if let Some(title) = &payload.title {
            post.title = title.clone();
        }
        if let Some(description) = &payload.description {
            post.description = description.clone();
        }
        if let Some(content_type) = content_type {
            post.content_type = content_type.to_string();
        }
        if let Some(content) = &payload.content {
            post.content = content.clone();
        }
        if let Some(visibility) = visibility {
            post.visibility = visibility.to_string();
        }
        if let Some(unlisted) = payload.unlisted {
            post.unlisted = unlisted;
        }
        repos.posts().update(&post)?;
        if let Some(categories) = &payload.categories {
            repos.posts().set_categories(post.id, categories)?;
        }
        match encode_post_in_repos(&state.codec, &repos, &post)? {
            Some(repr) => Ok(Outcome::Done(repr)),
            None => Ok(Outcome::Missing),
        }
    })?;

    match outcome {
        Outcome::Done(repr) => Ok(Json(repr)),
        Outcome::Missing => Err(ApiError::NotFound(format!("post {post_id} not found"))),
        Outcome::NotOwner => Err(ApiError::Forbidden(
            "only the owning author may edit a post".into(),
        )),
    }
}

pub(crate) async fn delete_post(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    enum Outcome {
        Done,
        Missing,
        NotOwner,
    }

    let outcome = state.database.with_repositories(|repos| {
        let Some(post) = repos.posts().get(post_id)? else {
            return Ok(Outcome::Missing);
        };
        if post.author_id != author_id {
            return Ok(Outcome::NotOwner);
        }
        repos.posts().delete(post_id)?;
        Ok(Outcome::Done)
    })?;

    match outcome {
        Outcome::Done => Ok(StatusCode::NO_CONTENT),
        Outcome::Missing => Err(ApiError::NotFound(format!("post {post_id} not found"))),
        Outcome::NotOwner => Err(ApiError::Forbidden(
            "only the owning author may delete a post".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateCommentRequest {
    comment: String,
    #[serde(default)]
    content_type: Option<String>,
}

pub(crate) async fn create_comment(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<CommentRepr> {
    let content_type = validated_content_type(payload.content_type.as_deref())?;
    let repr = state.database.with_repositories(|repos| {
        let Some(author) = repos.authors().get(author_id)? else {
            return Ok(None);
        };
        if repos.posts().get(post_id)?.is_none() {
            return Ok(None);
        }
        let comment = repos.comments().create(
            post_id,
            author_id,
            &payload.comment,
            content_type,
            &now_utc_iso(),
        )?;
        Ok(Some(state.codec.encode_comment(&comment, &author)))
    })?;
    let repr = repr.ok_or_else(|| {
        ApiError::NotFound(format!("author {author_id} or post {post_id} not found"))
    })?;
    Ok(Json(repr))
}

/// Direct local like; same idempotence rule as a like arriving through the
/// inbox.
pub(crate) async fn like_post(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
) -> ApiResult<LikeRepr> {
    let repr = state.database.with_repositories(|repos| {
        let Some(author) = repos.authors().get(author_id)? else {
            return Ok(None);
        };
        let Some(post) = repos.posts().get(post_id)? else {
            return Ok(None);
        };
        repos.likes().like_post(author_id, post_id, &now_utc_iso())?;
        let object_url = state.codec.post_url(post.author_id, post.id);
        Ok(Some(state.codec.encode_like(&author, &object_url, LikeTarget::Post)))
    })?;
    let repr = repr.ok_or_else(|| {
        ApiError::NotFound(format!("author {author_id} or post {post_id} not found"))
    })?;
    Ok(Json(repr))
}

pub(crate) async fn like_comment(
    State(state): State<AppState>,
    Path((author_id, comment_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let applied = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none()
            || repos.comments().get(comment_id)?.is_none()
        {
            return Ok(false);
        }
        repos
            .likes()
            .like_comment(author_id, comment_id, &now_utc_iso())?;
        Ok(true)
    })?;
    if !applied {
        return Err(ApiError::NotFound(format!(
            "author {author_id} or comment {comment_id} not found"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn unlike_comment(
    State(state): State<AppState>,
    Path((author_id, comment_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let known = state.database.with_repositories(|repos| {
        if repos.comments().get(comment_id)?.is_none() {
            return Ok(false);
        }
        repos.likes().unlike_comment(author_id, comment_id)?;
        Ok(true)
    })?;
    if !known {
        return Err(ApiError::NotFound(format!("comment {comment_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
