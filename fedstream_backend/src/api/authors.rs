use super::{ApiError, ApiResult, AppState, CollectionResponse, PageParams};
use crate::database::models::NewAuthor;
use crate::database::repositories::{
    AuthorRepository, CommentRepository, FollowRepository, LikeRepository, PostRepository,
    SqliteRepositories,
};
use crate::federation::codec::{
    AuthorRepr, CommentRepr, LikeRepr, LikeTarget, PostRepr, WireCodec,
};
use crate::federation::feed::FeedService;
use crate::utils::now_utc_iso;
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::DateTime;
use serde::Deserialize;

/// Comments embedded into a post representation (`commentsSrc`) are capped
/// at one page; the full collection lives behind the `comments` URL.
pub(crate) const COMMENT_PAGE_SIZE: usize = 5;

pub(crate) async fn list_authors(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<CollectionResponse<AuthorRepr>> {
    let items = state.database.with_repositories(|repos| {
        let authors = repos.authors().list(params.offset(), params.size())?;
        Ok(authors
            .iter()
            .map(|author| state.codec.encode_author(author))
            .collect())
    })?;
    Ok(Json(CollectionResponse {
        kind: "authors",
        items,
    }))
}

pub(crate) async fn get_author(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
) -> ApiResult<AuthorRepr> {
    let author = state
        .database
        .with_repositories(|repos| repos.authors().get(author_id))?
        .ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(state.codec.encode_author(&author)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateAuthorRequest {
    username: String,
    display_name: String,
    #[serde(default)]
    github_url: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
}

pub(crate) async fn create_author(
    State(state): State<AppState>,
    Json(payload): Json<CreateAuthorRequest>,
) -> ApiResult<AuthorRepr> {
    if payload.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }
    let author = state.database.with_repositories(|repos| {
        if repos.authors().get_by_username(&payload.username)?.is_some() {
            return Ok(None);
        }
        let author = repos.authors().create(
            &NewAuthor {
                username: payload.username.clone(),
                display_name: payload.display_name.clone(),
                github_url: payload.github_url.clone(),
                profile_image_url: payload.profile_image_url.clone(),
            },
            &now_utc_iso(),
        )?;
        Ok(Some(author))
    })?;
    match author {
        Some(author) => Ok(Json(state.codec.encode_author(&author))),
        None => Err(ApiError::Conflict(format!(
            "username {} is taken",
            payload.username
        ))),
    }
}

pub(crate) async fn list_posts(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> ApiResult<CollectionResponse<PostRepr>> {
    let items = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let posts = repos
            .posts()
            .list_for_author(author_id, params.offset(), params.size())?;
        let mut items = Vec::with_capacity(posts.len());
        for post in posts {
            if let Some(repr) = encode_post_in_repos(&state.codec, &repos, &post)? {
                items.push(repr);
            }
        }
        Ok(Some(items))
    })?;
    let items = items.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "posts",
        items,
    }))
}

pub(crate) async fn get_post(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
) -> ApiResult<PostRepr> {
    let repr = state.database.with_repositories(|repos| {
        let Some(post) = repos.posts().get(post_id)? else {
            return Ok(None);
        };
        if post.author_id != author_id {
            return Ok(None);
        }
        encode_post_in_repos(&state.codec, &repos, &post)
    })?;
    let mut repr = repr.ok_or_else(|| {
        ApiError::NotFound(format!("post {post_id} of author {author_id} not found"))
    })?;

    // A single post detail is worth a round trip per unresolved remote
    // commenter; the registry's GET cache bounds repeats.
    if let Some(page) = repr.comments_src.as_mut() {
        resolve_remote_authors(&state, &mut page.comments).await;
    }
    Ok(Json(repr))
}

pub(crate) async fn list_post_likes(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
) -> ApiResult<CollectionResponse<LikeRepr>> {
    let items = state.database.with_repositories(|repos| {
        let Some(post) = repos.posts().get(post_id)? else {
            return Ok(None);
        };
        if post.author_id != author_id {
            return Ok(None);
        }
        let object_url = state.codec.post_url(post.author_id, post.id);
        let mut items = Vec::new();
        for like in repos.likes().list_for_post(post_id)? {
            if let Some(author) = repos.authors().get(like.author_id)? {
                items.push(state.codec.encode_like(&author, &object_url, LikeTarget::Post));
            }
        }
        Ok(Some(items))
    })?;
    let items =
        items.ok_or_else(|| ApiError::NotFound(format!("post {post_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "likes",
        items,
    }))
}

pub(crate) async fn list_liked(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
) -> ApiResult<CollectionResponse<LikeRepr>> {
    let items = state.database.with_repositories(|repos| {
        let Some(author) = repos.authors().get(author_id)? else {
            return Ok(None);
        };
        let mut items = Vec::new();
        for like in repos.likes().list_by_author(author_id)? {
            if let Some(post) = repos.posts().get(like.post_id)? {
                let object_url = state.codec.post_url(post.author_id, post.id);
                items.push(state.codec.encode_like(&author, &object_url, LikeTarget::Post));
            }
        }
        Ok(Some(items))
    })?;
    let items =
        items.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "liked",
        items,
    }))
}

pub(crate) async fn list_post_comments(
    State(state): State<AppState>,
    Path((author_id, post_id)): Path<(i64, i64)>,
    Query(params): Query<PageParams>,
) -> ApiResult<CollectionResponse<CommentRepr>> {
    let comments = state.database.with_repositories(|repos| {
        let Some(post) = repos.posts().get(post_id)? else {
            return Ok(None);
        };
        if post.author_id != author_id {
            return Ok(None);
        }
        Ok(Some(merged_comments(&state.codec, &repos, post.author_id, post_id)?))
    })?;
    let comments =
        comments.ok_or_else(|| ApiError::NotFound(format!("post {post_id} not found")))?;

    let mut page: Vec<CommentRepr> = comments
        .into_iter()
        .skip(params.offset())
        .take(params.size())
        .collect();
    resolve_remote_authors(&state, &mut page).await;
    Ok(Json(CollectionResponse {
        kind: "comments",
        items: page,
    }))
}

pub(crate) async fn list_followers(
    State(state): State<AppState>,
    Path(author_id): Path<i64>,
) -> ApiResult<CollectionResponse<AuthorRepr>> {
    let items = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let mut items = Vec::new();
        for follower_id in repos.follows().followers_of(author_id)? {
            if let Some(follower) = repos.authors().get(follower_id)? {
                items.push(state.codec.encode_author(&follower));
            }
        }
        Ok(Some(items))
    })?;
    let items =
        items.ok_or_else(|| ApiError::NotFound(format!("author {author_id} not found")))?;
    Ok(Json(CollectionResponse {
        kind: "followers",
        items,
    }))
}

pub(crate) async fn get_follower(
    State(state): State<AppState>,
    Path((author_id, follower_id)): Path<(i64, i64)>,
) -> ApiResult<AuthorRepr> {
    let follower = state.database.with_repositories(|repos| {
        if !repos.follows().is_following(follower_id, author_id)? {
            return Ok(None);
        }
        repos.authors().get(follower_id)
    })?;
    let follower = follower.ok_or_else(|| {
        ApiError::NotFound(format!("{follower_id} does not follow {author_id}"))
    })?;
    Ok(Json(state.codec.encode_author(&follower)))
}

pub(crate) async fn put_follower(
    State(state): State<AppState>,
    Path((author_id, follower_id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    if author_id == follower_id {
        return Err(ApiError::BadRequest("author cannot follow themselves".into()));
    }
    let outcome = state.database.with_repositories(|repos| {
        let Some(follower) = repos.authors().get(follower_id)? else {
            return Ok(None);
        };
        if repos.authors().get(author_id)?.is_none() {
            return Ok(None);
        }
        let inserted = repos
            .follows()
            .follow(follower_id, author_id, &now_utc_iso())?;
        Ok(Some((inserted, follower)))
    })?;
    let (inserted, follower) = outcome
        .ok_or_else(|| ApiError::NotFound("author or follower not found".into()))?;
    if inserted {
        Ok((StatusCode::OK, Json(state.codec.encode_author(&follower))).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

pub(crate) async fn delete_follower(
    State(state): State<AppState>,
    Path((author_id, follower_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let known = state.database.with_repositories(|repos| {
        if repos.authors().get(author_id)?.is_none()
            || repos.authors().get(follower_id)?.is_none()
        {
            return Ok(false);
        }
        repos.follows().unfollow(follower_id, author_id)?;
        Ok(true)
    })?;
    if !known {
        return Err(ApiError::NotFound("author or follower not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Encodes a post with its author, categories, and the first page of its
/// comments (local and remote merged, newest first). Returns `None` when
/// the owning author row is gone.
pub(crate) fn encode_post_in_repos(
    codec: &WireCodec,
    repos: &SqliteRepositories<'_>,
    post: &crate::database::models::PostRecord,
) -> Result<Option<PostRepr>> {
    let Some(author) = repos.authors().get(post.author_id)? else {
        return Ok(None);
    };
    let categories = repos.posts().categories_for(post.id)?;
    let comments = merged_comments(codec, repos, post.author_id, post.id)?;
    let count = comments.len() as i64;
    let page = comments.into_iter().take(COMMENT_PAGE_SIZE).collect();
    Ok(Some(codec.encode_post(post, &author, categories, page, count)))
}

/// Local and remote comments on a post as one newest-first sequence.
fn merged_comments(
    codec: &WireCodec,
    repos: &SqliteRepositories<'_>,
    post_author_id: i64,
    post_id: i64,
) -> Result<Vec<CommentRepr>> {
    let mut comments = Vec::new();
    for comment in repos.comments().list_for_post(post_id)? {
        if let Some(author) = repos.authors().get(comment.author_id)? {
            comments.push(codec.encode_comment(&comment, &author));
        }
    }
    for comment in repos.comments().list_remote_for_post(post_id)? {
        comments.push(codec.encode_remote_comment(&comment, post_author_id, None));
    }
    comments.sort_by_key(|comment| {
        std::cmp::Reverse(comment.published.unwrap_or(DateTime::UNIX_EPOCH))
    });
    Ok(comments)
}

/// Fills in remote commenters' full representations through their owning
/// peers; a commenter that cannot be resolved keeps the URL-only author.
async fn resolve_remote_authors(state: &AppState, comments: &mut [CommentRepr]) {
    let feed = FeedService::new(
        state.database.clone(),
        state.registry.clone(),
        state.codec.clone(),
    );
    for comment in comments {
        if comment.author.display_name.is_some() {
            continue;
        }
        let author_url = comment.author.canonical_url().to_string();
        if let Some(resolved) = feed.remote_author_detail(&author_url).await {
            comment.author = resolved;
        }
    }
}
