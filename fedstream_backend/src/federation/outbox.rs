use super::codec::WireCodec;
use super::registry::PeerRegistry;
use super::FederationError;
use crate::database::repositories::{AuthorRepository, FollowRepository};
use crate::database::Database;
use crate::utils::now_utc_iso;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

/// Whether an outbound activity actually left the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDelivery {
    Sent,
    /// No registered peer owns the target's host; the activity is dropped.
    NoPeer,
}

/// Builds and delivers outbound activities on behalf of local authors.
pub struct OutboxService {
    database: Database,
    registry: Arc<PeerRegistry>,
    codec: WireCodec,
}

impl OutboxService {
    pub fn new(database: Database, registry: Arc<PeerRegistry>, codec: WireCodec) -> Self {
        Self {
            database,
            registry,
            codec,
        }
    }

    /// Sends a Follow activity to the peer owning the remote author. The
    /// remote author representation is forwarded exactly as it was
    /// received; only our actor is re-encoded canonically.
    pub async fn send_follow(
        &self,
        actor_id: i64,
        object: Value,
    ) -> Result<FollowDelivery, FederationError> {
        let actor = self
            .database
            .with_repositories(|repos| repos.authors().get(actor_id))?
            .ok_or_else(|| {
                FederationError::Unprocessable(format!("unknown local author {actor_id}"))
            })?;

        let object_url = object
            .get("url")
            .or_else(|| object.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FederationError::Unprocessable("remote author has no url or id".into())
            })?;
        let parsed = Url::parse(object_url)
            .map_err(|_| FederationError::MalformedIdentifier(object_url.to_string()))?;

        // Remember the outgoing edge regardless of delivery so the pending
        // state survives a restart.
        self.database.with_repositories(|repos| {
            repos
                .follows()
                .create_remote_follow(actor_id, parsed.as_str(), &now_utc_iso())
        })?;

        let activity = build_follow_activity(&self.codec, &actor, &object);
        let Some(peer) = self.registry.find_by_host(&parsed) else {
            tracing::warn!(target = %parsed, "no registered peer owns this author, follow not sent");
            return Ok(FollowDelivery::NoPeer);
        };

        let inbox_path = format!("{}/inbox/", peer.path_for(&parsed));
        self.registry.post(peer, &inbox_path, &activity).await;
        Ok(FollowDelivery::Sent)
    }

    /// Drops the locally stored edge for a remote follow. No activity is
    /// sent; peers learn about unfollows out of band in this revision.
    pub async fn remote_unfollow(
        &self,
        actor_id: i64,
        followee_url: &str,
    ) -> Result<bool, FederationError> {
        Ok(self.database.with_repositories(|repos| {
            repos.follows().delete_remote_follow(actor_id, followee_url)
        })?)
    }
}

fn build_follow_activity(
    codec: &WireCodec,
    actor: &crate::database::models::AuthorRecord,
    object: &Value,
) -> Value {
    let object_name = object
        .get("displayName")
        .or_else(|| object.get("display_name"))
        .and_then(Value::as_str)
        .unwrap_or("them");
    json!({
        "type": "Follow",
        "summary": format!("{} wants to follow {object_name}", actor.display_name),
        "actor": codec.encode_author(actor),
        "object": object,
    })
}
