use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub github_url: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuthor {
    pub username: String,
    pub display_name: String,
    pub github_url: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub description: String,
    /// One of `text/markdown`, `text/plain`, `application/base64`,
    /// `image/png;base64`, `image/jpeg;base64`.
    pub content_type: String,
    pub content: String,
    /// `PUBLIC` or `FRIENDS`.
    pub visibility: String,
    pub unlisted: bool,
    pub published: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub author_id: i64,
    pub title: String,
    pub description: String,
    pub content_type: String,
    pub content: String,
    pub visibility: String,
    pub unlisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub comment: String,
    pub content_type: String,
    pub published: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author_url: String,
    pub comment: String,
    pub content_type: String,
    pub published: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRecord {
    pub author_id: i64,
    pub post_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLikeRecord {
    pub author_url: String,
    pub post_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRecord {
    pub follower_id: i64,
    pub followee_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRequestRecord {
    pub from_id: i64,
    pub to_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRequestRecord {
    pub from_url: String,
    pub to_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFollowRecord {
    pub follower_id: i64,
    pub followee_url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFollowerRecord {
    pub follower_url: String,
    pub followee_id: i64,
    pub created_at: String,
}
