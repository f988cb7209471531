//! Canonical wire representations exchanged between federation instances.
//!
//! Encoding always emits the current field names (`displayName`,
//! `contentType`, `commentsSrc`); decoding additionally accepts the
//! historical snake_case variants still produced by peers on older protocol
//! revisions. The accepted aliases are declared per field so the
//! compatibility rule stays visible in one place.

use crate::database::models::{AuthorRecord, CommentRecord, PostRecord, RemoteCommentRecord};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    #[serde(rename = "text/markdown")]
    Markdown,
    #[serde(rename = "text/plain")]
    Plain,
    #[serde(rename = "application/base64")]
    Base64,
    #[serde(rename = "image/png;base64")]
    Png,
    #[serde(rename = "image/jpeg;base64")]
    Jpeg,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Markdown => "text/markdown",
            ContentKind::Plain => "text/plain",
            ContentKind::Base64 => "application/base64",
            ContentKind::Png => "image/png;base64",
            ContentKind::Jpeg => "image/jpeg;base64",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text/markdown" => Some(ContentKind::Markdown),
            "text/plain" => Some(ContentKind::Plain),
            "application/base64" => Some(ContentKind::Base64),
            "image/png;base64" => Some(ContentKind::Png),
            "image/jpeg;base64" => Some(ContentKind::Jpeg),
            _ => None,
        }
    }
}

impl Default for ContentKind {
    fn default() -> Self {
        ContentKind::Plain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "FRIENDS")]
    Friends,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Friends => "FRIENDS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PUBLIC" => Some(Visibility::Public),
            "FRIENDS" => Some(Visibility::Friends),
            _ => None,
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Public
    }
}

fn author_tag() -> String {
    "author".into()
}

fn post_tag() -> String {
    "post".into()
}

fn comment_tag() -> String {
    "comment".into()
}

fn comments_tag() -> String {
    "comments".into()
}

fn like_tag() -> String {
    "Like".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRepr {
    #[serde(rename = "type", default = "author_tag")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(rename = "displayName", alias = "display_name", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub github: Option<String>,
    #[serde(rename = "profileImage", alias = "profile_image", default)]
    pub profile_image: Option<String>,
}

impl AuthorRepr {
    /// The author's canonical URL; peers are expected to set `id` to the
    /// dereferenceable URL, with `url` as a fallback for older revisions.
    pub fn canonical_url(&self) -> &str {
        self.url.as_deref().unwrap_or(&self.id)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRepr {
    #[serde(rename = "type", default = "comment_tag")]
    pub kind: String,
    pub id: String,
    pub author: AuthorRepr,
    pub comment: String,
    #[serde(rename = "contentType", alias = "content_type", default)]
    pub content_type: ContentKind,
    #[serde(with = "wire_time::option", default)]
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsPage {
    #[serde(rename = "type", default = "comments_tag")]
    pub kind: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub post: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub comments: Vec<CommentRepr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRepr {
    #[serde(rename = "type", default = "post_tag")]
    pub kind: String,
    /// Canonical source URL of the post; doubles as the identifier.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "contentType", alias = "content_type", default)]
    pub content_type: ContentKind,
    #[serde(default)]
    pub content: String,
    pub author: AuthorRepr,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(with = "wire_time::option", default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub unlisted: bool,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub count: i64,
    /// URL of the post's comments collection.
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(
        rename = "commentsSrc",
        alias = "comment_src",
        default,
        deserialize_with = "deserialize_comments_src",
        skip_serializing_if = "Option::is_none"
    )]
    pub comments_src: Option<CommentsPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRepr {
    #[serde(rename = "type", default = "like_tag")]
    pub kind: String,
    pub author: AuthorRepr,
    /// URL of the liked resource.
    pub object: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Post,
    Comment,
}

/// Older peers ship `comment_src` as a bare array instead of the paged
/// object; both decode to a [`CommentsPage`].
fn deserialize_comments_src<'de, D>(deserializer: D) -> Result<Option<CommentsPage>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        Page(CommentsPage),
        Bare(Vec<CommentRepr>),
    }

    let shape = Option::<Shape>::deserialize(deserializer)?;
    Ok(shape.map(|shape| match shape {
        Shape::Page(page) => page,
        Shape::Bare(comments) => CommentsPage {
            kind: comments_tag(),
            page: 1,
            post: String::new(),
            id: String::new(),
            comments,
        },
    }))
}

/// Collection payloads arrive either as `{"items": [...]}` or as a bare
/// array. Returns the individual item values so callers can decode each one
/// independently and skip the malformed ones.
pub fn collection_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Parses a stored or wire timestamp into a comparable instant. Ordering
/// decisions are always made on the parsed value, never on the raw string.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

pub mod wire_time {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_instant(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp `{raw}`")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                Some(raw) => super::parse_instant(&raw)
                    .map(Some)
                    .ok_or_else(|| {
                        serde::de::Error::custom(format!("unrecognized timestamp `{raw}`"))
                    }),
                None => Ok(None),
            }
        }
    }
}

/// Maps local storage records onto the wire shapes, rooted at this
/// instance's public base URL.
#[derive(Debug, Clone)]
pub struct WireCodec {
    base_url: String,
    host: String,
}

impl WireCodec {
    pub fn new(public_url: &str) -> Self {
        let base_url = public_url.trim_end_matches('/').to_string();
        let host = url::Url::parse(&base_url)
            .map(|parsed| format!("{}/", parsed.origin().ascii_serialization()))
            .unwrap_or_else(|_| base_url.clone());
        Self { base_url, host }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Origin of the public URL with a trailing slash, e.g.
    /// `https://node.example/`.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn author_url(&self, author_id: i64) -> String {
        format!("{}/authors/{author_id}", self.base_url)
    }

    pub fn post_url(&self, author_id: i64, post_id: i64) -> String {
        format!("{}/authors/{author_id}/posts/{post_id}", self.base_url)
    }

    pub fn comment_url(&self, author_id: i64, post_id: i64, comment_id: i64) -> String {
        format!(
            "{}/authors/{author_id}/posts/{post_id}/comments/{comment_id}",
            self.base_url
        )
    }

    fn remote_comment_url(&self, author_id: i64, post_id: i64, row_id: i64) -> String {
        format!(
            "{}/authors/{author_id}/posts/{post_id}/remote-comments/{row_id}",
            self.base_url
        )
    }

    /// Local authors encode with `id` equal to the canonical `url`, so a
    /// receiving peer can always dereference `id` without special-casing.
    pub fn encode_author(&self, author: &AuthorRecord) -> AuthorRepr {
        let url = self.author_url(author.id);
        AuthorRepr {
            kind: author_tag(),
            id: url.clone(),
            url: Some(url),
            host: Some(self.host.clone()),
            display_name: Some(author.display_name.clone()),
            github: author.github_url.clone(),
            profile_image: author.profile_image_url.clone(),
        }
    }

    pub fn encode_comment(&self, comment: &CommentRecord, author: &AuthorRecord) -> CommentRepr {
        CommentRepr {
            kind: comment_tag(),
            id: self.comment_url(author.id, comment.post_id, comment.id),
            author: self.encode_author(author),
            comment: comment.comment.clone(),
            content_type: ContentKind::parse(&comment.content_type).unwrap_or_default(),
            published: parse_instant(&comment.published),
        }
    }

    /// Remote comments carry only the remote author's URL locally; the full
    /// representation is attached when the owning peer could be consulted.
    pub fn encode_remote_comment(
        &self,
        comment: &RemoteCommentRecord,
        post_author_id: i64,
        resolved_author: Option<AuthorRepr>,
    ) -> CommentRepr {
        let author = resolved_author.unwrap_or_else(|| AuthorRepr {
            kind: author_tag(),
            id: comment.author_url.clone(),
            url: Some(comment.author_url.clone()),
            host: None,
            display_name: None,
            github: None,
            profile_image: None,
        });
        CommentRepr {
            kind: comment_tag(),
            id: self.remote_comment_url(post_author_id, comment.post_id, comment.id),
            author,
            comment: comment.comment.clone(),
            content_type: ContentKind::parse(&comment.content_type).unwrap_or_default(),
            published: parse_instant(&comment.published),
        }
    }

    pub fn encode_post(
        &self,
        post: &PostRecord,
        author: &AuthorRecord,
        categories: Vec<String>,
        comments: Vec<CommentRepr>,
        comment_count: i64,
    ) -> PostRepr {
        let post_url = self.post_url(author.id, post.id);
        let comments_url = format!("{post_url}/comments");
        PostRepr {
            kind: post_tag(),
            id: post_url.clone(),
            title: post.title.clone(),
            description: post.description.clone(),
            content_type: ContentKind::parse(&post.content_type).unwrap_or_default(),
            content: post.content.clone(),
            author: self.encode_author(author),
            categories,
            published: parse_instant(&post.published),
            visibility: Visibility::parse(&post.visibility).unwrap_or_default(),
            unlisted: post.unlisted,
            origin: Some(post_url.clone()),
            source: Some(post_url),
            count: comment_count,
            comments: Some(comments_url.clone()),
            comments_src: Some(CommentsPage {
                kind: comments_tag(),
                page: 1,
                post: self.post_url(author.id, post.id),
                id: comments_url,
                comments,
            }),
        }
    }

    pub fn encode_like(
        &self,
        author: &AuthorRecord,
        object_url: &str,
        target: LikeTarget,
    ) -> LikeRepr {
        let noun = match target {
            LikeTarget::Post => "post",
            LikeTarget::Comment => "comment",
        };
        LikeRepr {
            kind: like_tag(),
            author: self.encode_author(author),
            object: object_url.to_string(),
            summary: format!("{} likes your {noun}", author.display_name),
        }
    }
}
