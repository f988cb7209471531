//! Inbound federation traffic lands here. Each request moves through
//! Received -> Classified -> Applied/Rejected/Deferred; nothing is shared
//! across requests and the only side effect is the single state mutation
//! for the activity being applied.

use super::codec::{AuthorRepr, LikeRepr, LikeTarget, WireCodec};
use super::identity::{IdentityResolver, ResolvedId};
use super::FederationError;
use crate::database::repositories::{AuthorRepository, FollowRepository, LikeRepository, PostRepository};
use crate::database::Database;
use crate::utils::now_utc_iso;
use serde_json::Value;

/// What the dispatcher did with an accepted activity; the API layer maps
/// this onto the response status.
#[derive(Debug)]
pub enum InboxOutcome {
    /// A like from a local actor: echo the canonical Like back (200).
    LocalLike(LikeRepr),
    /// Applied with nothing to report back to the sender (204).
    Applied,
}

pub struct InboxService {
    database: Database,
    resolver: IdentityResolver,
    codec: WireCodec,
}

impl InboxService {
    pub fn new(database: Database, resolver: IdentityResolver, codec: WireCodec) -> Self {
        Self {
            database,
            resolver,
            codec,
        }
    }

    /// Applies one inbound activity delivered to a local author's inbox.
    pub fn apply(&self, body: &[u8]) -> Result<InboxOutcome, FederationError> {
        let activity: Value = serde_json::from_slice(body)
            .map_err(|err| FederationError::Unprocessable(err.to_string()))?;

        let declared = activity
            .get("type")
            .and_then(Value::as_str)
            .map(|raw| raw.to_ascii_lowercase());

        match declared.as_deref() {
            Some("like") => self.apply_like(&activity),
            Some("follow") => self.apply_follow(&activity),
            Some("post") => Err(FederationError::NotImplemented("inbound post")),
            Some("comment") => Err(FederationError::NotImplemented("inbound comment")),
            _ => Err(FederationError::Unprocessable("Unknown type".into())),
        }
    }

    fn apply_like(&self, activity: &Value) -> Result<InboxOutcome, FederationError> {
        let actor_id = activity
            .get("author")
            .or_else(|| activity.get("actor"))
            .and_then(|author| author.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| FederationError::Unprocessable("like is missing author.id".into()))?;
        let object = activity
            .get("object")
            .and_then(Value::as_str)
            .ok_or_else(|| FederationError::Unprocessable("like is missing object".into()))?;

        if object.contains("/comments/") {
            return Err(FederationError::NotImplemented("likes on comments"));
        }

        let post_id = match self.resolver.resolve(object)? {
            ResolvedId::Local { id } => id,
            ResolvedId::Remote { .. } => {
                return Err(FederationError::Unprocessable(
                    "liked object is not owned by this instance".into(),
                ))
            }
        };

        match self.resolver.resolve(actor_id)? {
            ResolvedId::Local { id } => {
                let (author, object_url) = self.database.with_repositories(|repos| {
                    let author = repos.authors().get(id)?;
                    let post = repos.posts().get(post_id)?;
                    let object_url = post.map(|post| self.codec.post_url(post.author_id, post.id));
                    Ok((author, object_url))
                })?;
                let author = author.ok_or_else(|| {
                    FederationError::Unprocessable(format!("unknown local author {id}"))
                })?;
                let object_url = object_url.ok_or_else(|| {
                    FederationError::Unprocessable(format!("unknown local post {post_id}"))
                })?;

                // Duplicate likes are idempotent no-ops.
                self.database.with_repositories(|repos| {
                    repos.likes().like_post(id, post_id, &now_utc_iso())
                })?;
                tracing::info!(actor = id, post = post_id, "applied inbound local like");
                Ok(InboxOutcome::LocalLike(self.codec.encode_like(
                    &author,
                    &object_url,
                    LikeTarget::Post,
                )))
            }
            ResolvedId::Remote { url } => {
                let exists = self
                    .database
                    .with_repositories(|repos| Ok(repos.posts().get(post_id)?.is_some()))?;
                if !exists {
                    return Err(FederationError::Unprocessable(format!(
                        "unknown local post {post_id}"
                    )));
                }
                self.database.with_repositories(|repos| {
                    repos
                        .likes()
                        .remote_like_post(url.as_str(), post_id, &now_utc_iso())
                })?;
                tracing::info!(actor = %url, post = post_id, "applied inbound remote like");
                Ok(InboxOutcome::Applied)
            }
        }
    }

    fn apply_follow(&self, activity: &Value) -> Result<InboxOutcome, FederationError> {
        let actor: AuthorRepr = decode_author(activity.get("actor"), "actor")?;
        let object: AuthorRepr = decode_author(activity.get("object"), "object")?;

        let followee_id = match self.resolver.resolve(&object.id)? {
            ResolvedId::Local { id } => id,
            ResolvedId::Remote { .. } => {
                return Err(FederationError::Unprocessable(
                    "follow object is not owned by this instance".into(),
                ))
            }
        };
        let followee_exists = self
            .database
            .with_repositories(|repos| Ok(repos.authors().get(followee_id)?.is_some()))?;
        if !followee_exists {
            return Err(FederationError::Unprocessable(format!(
                "unknown local author {followee_id}"
            )));
        }

        match self.resolver.resolve(&actor.id)? {
            ResolvedId::Local { id } => {
                if id == followee_id {
                    return Err(FederationError::Unprocessable(
                        "author cannot follow themselves".into(),
                    ));
                }
                self.database.with_repositories(|repos| {
                    repos
                        .follows()
                        .create_request(id, followee_id, &now_utc_iso())
                })?;
                tracing::info!(from = id, to = followee_id, "applied inbound follow request");
            }
            ResolvedId::Remote { url } => {
                self.database.with_repositories(|repos| {
                    repos
                        .follows()
                        .create_remote_request(url.as_str(), followee_id, &now_utc_iso())
                })?;
                tracing::info!(from = %url, to = followee_id, "applied inbound remote follow request");
            }
        }
        Ok(InboxOutcome::Applied)
    }
}

fn decode_author(value: Option<&Value>, field: &str) -> Result<AuthorRepr, FederationError> {
    let value = value
        .ok_or_else(|| FederationError::Unprocessable(format!("follow is missing {field}")))?;
    serde_json::from_value(value.clone())
        .map_err(|err| FederationError::Unprocessable(format!("malformed {field}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewAuthor, NewPost};
    use serde_json::json;

    const BASE: &str = "https://node.example/api/v1";

    fn service() -> InboxService {
        let database = Database::open_in_memory().expect("in-memory db");
        InboxService::new(
            database,
            IdentityResolver::new(BASE).unwrap(),
            WireCodec::new(BASE),
        )
    }

    fn seed_author(service: &InboxService, username: &str) -> i64 {
        service
            .database
            .with_repositories(|repos| {
                Ok(repos
                    .authors()
                    .create(
                        &NewAuthor {
                            username: username.into(),
                            display_name: format!("{username} display"),
                            github_url: None,
                            profile_image_url: None,
                        },
                        "2024-01-01T00:00:00Z",
                    )?
                    .id)
            })
            .unwrap()
    }

    fn seed_post(service: &InboxService, author_id: i64) -> i64 {
        service
            .database
            .with_repositories(|repos| {
                Ok(repos
                    .posts()
                    .create(
                        &NewPost {
                            author_id,
                            title: "A post".into(),
                            description: String::new(),
                            content_type: "text/plain".into(),
                            content: "hello".into(),
                            visibility: "PUBLIC".into(),
                            unlisted: false,
                        },
                        "2024-01-01T00:00:01Z",
                    )?
                    .id)
            })
            .unwrap()
    }

    fn like_activity(author_id: &str, object: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "Like",
            "author": {"id": author_id, "displayName": "Bob"},
            "object": object,
        }))
        .unwrap()
    }

    #[test]
    fn local_like_applies_once_and_echoes_the_like() {
        let service = service();
        let author = seed_author(&service, "bob");
        let post = seed_post(&service, author);
        let body = like_activity(
            &format!("{BASE}/authors/{author}"),
            &format!("{BASE}/authors/{author}/posts/{post}"),
        );

        let outcome = service.apply(&body).unwrap();
        match outcome {
            InboxOutcome::LocalLike(like) => {
                assert_eq!(like.kind, "Like");
                assert_eq!(like.summary, "bob display likes your post");
            }
            other => panic!("expected local like, got {other:?}"),
        }

        // Redelivery is an idempotent no-op.
        service.apply(&body).unwrap();
        let count = service
            .database
            .with_repositories(|repos| repos.likes().count_for_post(post))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn remote_like_lands_in_the_remote_table_only() {
        let service = service();
        let author = seed_author(&service, "bob");
        let post = seed_post(&service, author);
        let body = like_activity(
            "https://peer.example/api/v1/authors/9",
            &format!("{BASE}/authors/{author}/posts/{post}"),
        );

        assert!(matches!(service.apply(&body).unwrap(), InboxOutcome::Applied));
        let (local, remote) = service
            .database
            .with_repositories(|repos| {
                Ok((
                    repos.likes().count_for_post(post)?,
                    repos.likes().remote_count_for_post(post)?,
                ))
            })
            .unwrap();
        assert_eq!(local, 0);
        assert_eq!(remote, 1);
    }

    #[test]
    fn comment_likes_are_a_named_gap() {
        let service = service();
        let author = seed_author(&service, "bob");
        let post = seed_post(&service, author);
        let body = like_activity(
            &format!("{BASE}/authors/{author}"),
            &format!("{BASE}/authors/{author}/posts/{post}/comments/1"),
        );
        assert!(matches!(
            service.apply(&body).unwrap_err(),
            FederationError::NotImplemented(_)
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let service = service();
        let body = serde_json::to_vec(&json!({"type": "Poke"})).unwrap();
        match service.apply(&body).unwrap_err() {
            FederationError::Unprocessable(detail) => assert_eq!(detail, "Unknown type"),
            other => panic!("expected unprocessable, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        let service = service();
        assert!(matches!(
            service.apply(b"{not json").unwrap_err(),
            FederationError::Unprocessable(_)
        ));
    }

    #[test]
    fn follow_between_locals_creates_a_pending_request() {
        let service = service();
        let bob = seed_author(&service, "bob");
        let alice = seed_author(&service, "alice");
        let body = serde_json::to_vec(&json!({
            "type": "Follow",
            "actor": {"id": format!("{BASE}/authors/{bob}")},
            "object": {"id": format!("{BASE}/authors/{alice}")},
        }))
        .unwrap();

        assert!(matches!(service.apply(&body).unwrap(), InboxOutcome::Applied));
        let pending = service
            .database
            .with_repositories(|repos| repos.follows().requests_for(alice))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_id, bob);
    }

    #[test]
    fn follow_from_remote_actor_is_kept_by_url() {
        let service = service();
        let alice = seed_author(&service, "alice");
        let body = serde_json::to_vec(&json!({
            "type": "Follow",
            "actor": {"id": "https://peer.example/api/v1/authors/3", "display_name": "Remote Rae"},
            "object": {"id": format!("{BASE}/authors/{alice}")},
        }))
        .unwrap();

        assert!(matches!(service.apply(&body).unwrap(), InboxOutcome::Applied));
        let pending = service
            .database
            .with_repositories(|repos| repos.follows().remote_requests_for(alice))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_url, "https://peer.example/api/v1/authors/3");
    }

    #[test]
    fn post_and_comment_activities_stay_deferred() {
        let service = service();
        for kind in ["Post", "Comment"] {
            let body = serde_json::to_vec(&json!({"type": kind})).unwrap();
            assert!(matches!(
                service.apply(&body).unwrap_err(),
                FederationError::NotImplemented(_)
            ));
        }
    }
}
