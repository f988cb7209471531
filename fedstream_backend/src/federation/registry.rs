use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// GET responses are reused for this window to bound the load that feed
/// fan-out puts on peers. Entries expire on their own and are never
/// invalidated early.
const GET_CACHE_TTL: Duration = Duration::from_secs(180);

/// A statically configured peer instance: base service address plus the
/// basic-auth credentials it expects from us.
#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    pub service_address: String,
    pub username: String,
    pub password: String,
}

impl Peer {
    fn base(&self) -> &str {
        self.service_address.trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base(), path)
    }

    /// Rewrites a resource URL owned by this peer into a path relative to
    /// its service address, falling back to the raw URL path when the
    /// service address is not a prefix.
    pub fn path_for(&self, resource: &Url) -> String {
        resource
            .as_str()
            .strip_prefix(self.base())
            .map(|rest| rest.trim_end_matches('/').to_string())
            .unwrap_or_else(|| resource.path().trim_end_matches('/').to_string())
    }
}

/// The set of known peers in insertion order, plus the outbound HTTP
/// transport used to talk to them. Components receive the registry
/// explicitly; there is no process-wide peer list.
pub struct PeerRegistry {
    peers: Vec<Peer>,
    client: reqwest::Client,
    cache: Mutex<ResponseCache>,
}

impl PeerRegistry {
    pub fn new(peers: Vec<Peer>, client: reqwest::Client) -> Self {
        Self {
            peers,
            client,
            cache: Mutex::new(ResponseCache::new(GET_CACHE_TTL)),
        }
    }

    /// Loads the peer list from a JSON file; a missing file is an empty
    /// registry, not an error.
    pub fn from_file(path: &Path, client: reqwest::Client) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no peers file, starting with an empty registry");
            return Ok(Self::new(Vec::new(), client));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read peers file {}", path.display()))?;
        let peers: Vec<Peer> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse peers file {}", path.display()))?;
        Ok(Self::new(peers, client))
    }

    /// Iteration order is insertion order; feed fan-out relies on it being
    /// deterministic.
    pub fn all_peers(&self) -> &[Peer] {
        &self.peers
    }

    /// First peer whose service address shares the URL's host, if any.
    pub fn find_by_host(&self, url: &Url) -> Option<&Peer> {
        let target = authority_of(url)?;
        self.peers.iter().find(|peer| {
            Url::parse(&peer.service_address)
                .ok()
                .and_then(|parsed| authority_of(&parsed))
                .map(|authority| authority == target)
                .unwrap_or(false)
        })
    }

    /// Authenticated GET against a peer, cached by (peer, path, params).
    pub async fn get(&self, peer: &Peer, path: &str, params: &[(String, String)]) -> Result<Value> {
        let key = cache_key(peer, path, params);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key, Instant::now()) {
                return Ok(hit);
            }
        }

        let response = self
            .client
            .get(peer.endpoint(path))
            .basic_auth(&peer.username, Some(&peer.password))
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {} from peer {}", path, peer.service_address))?
            .error_for_status()
            .with_context(|| format!("peer {} rejected GET {}", peer.service_address, path))?;
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("peer {} returned non-JSON for {}", peer.service_address, path))?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, body.clone(), Instant::now());
        }
        Ok(body)
    }

    /// Authenticated POST of an activity payload. Fire-and-forget: a failed
    /// delivery is logged and dropped, never retried.
    pub async fn post(&self, peer: &Peer, path: &str, body: &Value) {
        let result = self
            .client
            .post(peer.endpoint(path))
            .basic_auth(&peer.username, Some(&peer.password))
            .json(body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(peer = %peer.service_address, path, "activity delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    peer = %peer.service_address,
                    path,
                    status = %response.status(),
                    "peer rejected activity, dropping"
                );
            }
            Err(err) => {
                tracing::warn!(
                    peer = %peer.service_address,
                    path,
                    error = %err,
                    "activity delivery failed, dropping"
                );
            }
        }
    }
}

fn authority_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn cache_key(peer: &Peer, path: &str, params: &[(String, String)]) -> String {
    let mut params: Vec<_> = params.to_vec();
    params.sort();
    let mut key = format!("{}|{}", peer.base(), path);
    for (name, value) in params {
        key.push('|');
        key.push_str(&name);
        key.push('=');
        key.push_str(&value);
    }
    key
}

struct ResponseCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, Value)>,
}

impl ResponseCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        match self.entries.get(key) {
            Some((stored_at, value)) if now.duration_since(*stored_at) < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, key: String, value: Value, now: Instant) {
        self.entries
            .retain(|_, (stored_at, _)| now.duration_since(*stored_at) < self.ttl);
        self.entries.insert(key, (now, value));
    }
}
