//! The aggregated stream: local posts merged with posts fetched live from
//! every registered peer, sorted newest-first and paginated as one
//! sequence. A peer that is down contributes nothing; the stream never
//! fails because of a peer.

use super::codec::{collection_items, parse_instant, AuthorRepr, ContentKind, PostRepr, WireCodec};
use super::registry::{Peer, PeerRegistry};
use crate::database::repositories::{AuthorRepository, FollowRepository, PostRepository};
use crate::database::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// How many peers are queried at once during fan-out.
const FAN_OUT: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub content: String,
    #[serde(rename = "contentType")]
    pub content_type: ContentKind,
    #[serde(with = "super::codec::wire_time")]
    pub published: DateTime<Utc>,
    /// Display name of the post's author.
    pub author: String,
    /// Locally-routable URL for the post's detail view. Remote posts point
    /// at the remote-detail proxy so a click re-fetches live.
    #[serde(rename = "detailUrl")]
    pub detail_url: String,
}

pub struct FeedService {
    database: Database,
    registry: Arc<PeerRegistry>,
    codec: WireCodec,
}

impl FeedService {
    pub fn new(database: Database, registry: Arc<PeerRegistry>, codec: WireCodec) -> Self {
        Self {
            database,
            registry,
            codec,
        }
    }

    /// One page of the requester's stream: every public local post, FRIENDS
    /// posts from true friends, and everything the peers are serving.
    pub async fn aggregate(&self, requester_id: i64, page: usize, size: usize) -> Result<Vec<FeedItem>> {
        let mut items = self.local_items(requester_id)?;
        items.extend(self.remote_items().await);
        Ok(merge_feed(items, page, size))
    }

    fn local_items(&self, requester_id: i64) -> Result<Vec<FeedItem>> {
        self.database.with_repositories(|repos| {
            let friends = repos.follows().true_friends(requester_id)?;
            let mut posts = repos.posts().list_public()?;
            posts.extend(repos.posts().list_friends_authored(&friends)?);

            let mut items = Vec::with_capacity(posts.len());
            for post in posts {
                let Some(author) = repos.authors().get(post.author_id)? else {
                    continue;
                };
                items.push(FeedItem {
                    title: post.title.clone(),
                    description: post.description.clone(),
                    content: post.content.clone(),
                    content_type: ContentKind::parse(&post.content_type).unwrap_or_default(),
                    published: parse_instant(&post.published).unwrap_or(DateTime::UNIX_EPOCH),
                    author: author.display_name,
                    detail_url: self.codec.post_url(author.id, post.id),
                });
            }
            Ok(items)
        })
    }

    async fn remote_items(&self) -> Vec<FeedItem> {
        let batches: Vec<Vec<FeedItem>> = stream::iter(self.registry.all_peers().to_vec())
            .map(|peer| async move { self.peer_items(&peer).await })
            .buffer_unordered(FAN_OUT)
            .collect()
            .await;
        batches.into_iter().flatten().collect()
    }

    async fn peer_items(&self, peer: &Peer) -> Vec<FeedItem> {
        match self.fetch_peer_items(peer).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(
                    peer = %peer.service_address,
                    error = %err,
                    "peer unavailable, stream continues without it"
                );
                Vec::new()
            }
        }
    }

    async fn fetch_peer_items(&self, peer: &Peer) -> Result<Vec<FeedItem>> {
        let authors_payload = self.registry.get(peer, "/authors", &[]).await?;
        let mut items = Vec::new();
        for author_value in collection_items(&authors_payload) {
            let author: AuthorRepr = match serde_json::from_value(author_value) {
                Ok(author) => author,
                Err(err) => {
                    tracing::debug!(peer = %peer.service_address, error = %err, "skipping undecodable author");
                    continue;
                }
            };
            let Some(author_tail) = identifier_tail(author.canonical_url()) else {
                continue;
            };
            let posts_path = format!("/authors/{author_tail}/posts");
            let posts_payload = match self.registry.get(peer, &posts_path, &[]).await {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::debug!(
                        peer = %peer.service_address,
                        author = %author.id,
                        error = %err,
                        "skipping author whose posts could not be fetched"
                    );
                    continue;
                }
            };
            for post_value in collection_items(&posts_payload) {
                match serde_json::from_value::<PostRepr>(post_value) {
                    Ok(post) => items.push(self.remote_item(post)),
                    Err(err) => {
                        tracing::debug!(peer = %peer.service_address, error = %err, "skipping undecodable post");
                    }
                }
            }
        }
        Ok(items)
    }

    fn remote_item(&self, post: PostRepr) -> FeedItem {
        FeedItem {
            title: post.title,
            description: post.description,
            content: post.content,
            content_type: post.content_type,
            published: post.published.unwrap_or(DateTime::UNIX_EPOCH),
            author: post.author.display_name().to_string(),
            detail_url: self.remote_detail_url(&post.id),
        }
    }

    fn remote_detail_url(&self, remote_id: &str) -> String {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("url", remote_id)
            .finish();
        format!("{}remote/posts?{query}", self.codec.host())
    }

    /// Live detail for a remote post, fetched through the owning peer. Any
    /// failure (unknown host, dead peer, undecodable body) degrades to
    /// `None`.
    pub async fn remote_detail(&self, remote_url: &str) -> Option<PostRepr> {
        let parsed = Url::parse(remote_url).ok()?;
        let peer = self.registry.find_by_host(&parsed)?;
        let payload = match self.registry.get(peer, &peer.path_for(&parsed), &[]).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(url = %remote_url, error = %err, "remote post detail unavailable");
                return None;
            }
        };
        decode_single::<PostRepr>(payload)
    }

    /// Full representation of a remote author, through the owning peer.
    /// Detail fetches share the registry's bounded GET cache, so repeated
    /// lookups within a request don't refan to the peer.
    pub async fn remote_author_detail(&self, author_url: &str) -> Option<AuthorRepr> {
        let parsed = Url::parse(author_url).ok()?;
        let peer = self.registry.find_by_host(&parsed)?;
        let payload = match self.registry.get(peer, &peer.path_for(&parsed), &[]).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(url = %author_url, error = %err, "remote author detail unavailable");
                return None;
            }
        };
        decode_single::<AuthorRepr>(payload)
    }
}

/// Some peers answer a detail GET with the object, others with a
/// one-element collection.
fn decode_single<T: serde::de::DeserializeOwned>(payload: Value) -> Option<T> {
    if let Ok(decoded) = serde_json::from_value::<T>(payload.clone()) {
        return Some(decoded);
    }
    collection_items(&payload)
        .into_iter()
        .next()
        .and_then(|item| serde_json::from_value(item).ok())
}

/// The last path-ish segment of an identifier, whether it is a full URL or
/// a bare id.
fn identifier_tail(identifier: &str) -> Option<&str> {
    identifier
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|tail| !tail.is_empty())
}

/// Merge-sort-paginate, newest first. Ordering is decided on the parsed
/// instants.
fn merge_feed(mut items: Vec<FeedItem>, page: usize, size: usize) -> Vec<FeedItem> {
    items.sort_by(|a, b| b.published.cmp(&a.published));
    let page = page.max(1);
    items
        .into_iter()
        .skip((page - 1) * size)
        .take(size)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewAuthor, NewPost};

    const BASE: &str = "https://node.example/api/v1";

    fn item(title: &str, published: &str) -> FeedItem {
        FeedItem {
            title: title.into(),
            description: String::new(),
            content: String::new(),
            content_type: ContentKind::Plain,
            published: parse_instant(published).unwrap(),
            author: "someone".into(),
            detail_url: String::new(),
        }
    }

    #[test]
    fn merge_feed_orders_newest_first_regardless_of_source_order() {
        let items = vec![
            item("t1", "2024-01-01T00:00:00Z"),
            item("t3", "2024-03-01T00:00:00Z"),
            item("t2", "2024-02-01T00:00:00Z"),
        ];
        let merged = merge_feed(items, 1, 10);
        let titles: Vec<_> = merged.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn merge_feed_paginates_the_merged_sequence() {
        let items = (1..=5)
            .map(|day| item(&format!("t{day}"), &format!("2024-01-0{day}T00:00:00Z")))
            .collect();
        let second_page = merge_feed(items, 2, 2);
        let titles: Vec<_> = second_page.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["t3", "t2"]);
    }

    #[test]
    fn identifier_tail_handles_urls_and_bare_ids() {
        assert_eq!(identifier_tail("https://p.example/api/v1/authors/3/"), Some("3"));
        assert_eq!(identifier_tail("32d6cbd8-3a30"), Some("32d6cbd8-3a30"));
        assert_eq!(identifier_tail(""), None);
    }

    fn service() -> FeedService {
        let database = Database::open_in_memory().expect("in-memory db");
        FeedService::new(
            database,
            Arc::new(PeerRegistry::new(Vec::new(), reqwest::Client::new())),
            WireCodec::new(BASE),
        )
    }

    fn seed_author(service: &FeedService, username: &str) -> i64 {
        service
            .database
            .with_repositories(|repos| {
                Ok(repos
                    .authors()
                    .create(
                        &NewAuthor {
                            username: username.into(),
                            display_name: username.into(),
                            github_url: None,
                            profile_image_url: None,
                        },
                        "2024-01-01T00:00:00Z",
                    )?
                    .id)
            })
            .unwrap()
    }

    fn seed_post(service: &FeedService, author_id: i64, visibility: &str, published: &str) {
        service
            .database
            .with_repositories(|repos| {
                repos.posts().create(
                    &NewPost {
                        author_id,
                        title: format!("{visibility} at {published}"),
                        description: String::new(),
                        content_type: "text/plain".into(),
                        content: "hello".into(),
                        visibility: visibility.into(),
                        unlisted: false,
                    },
                    published,
                )?;
                Ok(())
            })
            .unwrap()
    }

    #[tokio::test]
    async fn friends_posts_require_a_symmetric_follow() {
        let service = service();
        let bob = seed_author(&service, "bob");
        let alice = seed_author(&service, "alice");
        seed_post(&service, alice, "FRIENDS", "2024-01-02T00:00:00Z");
        seed_post(&service, alice, "PUBLIC", "2024-01-03T00:00:00Z");

        let feed = service.aggregate(bob, 1, 10).await.unwrap();
        assert_eq!(feed.len(), 1, "only the public post before following");

        // One-directional follow is not enough.
        service
            .database
            .with_repositories(|repos| {
                repos.follows().follow(bob, alice, "2024-01-04T00:00:00Z")?;
                Ok(())
            })
            .unwrap();
        let feed = service.aggregate(bob, 1, 10).await.unwrap();
        assert_eq!(feed.len(), 1);

        service
            .database
            .with_repositories(|repos| {
                repos.follows().follow(alice, bob, "2024-01-05T00:00:00Z")?;
                Ok(())
            })
            .unwrap();
        let feed = service.aggregate(bob, 1, 10).await.unwrap();
        assert_eq!(feed.len(), 2, "friends post appears once mutual");
    }

    #[tokio::test]
    async fn unlisted_posts_stay_out_of_the_stream() {
        let service = service();
        let bob = seed_author(&service, "bob");
        service
            .database
            .with_repositories(|repos| {
                repos.posts().create(
                    &NewPost {
                        author_id: bob,
                        title: "hidden".into(),
                        description: String::new(),
                        content_type: "text/plain".into(),
                        content: "hello".into(),
                        visibility: "PUBLIC".into(),
                        unlisted: true,
                    },
                    "2024-01-02T00:00:00Z",
                )?;
                Ok(())
            })
            .unwrap();

        let feed = service.aggregate(bob, 1, 10).await.unwrap();
        assert!(feed.is_empty());
    }
}
