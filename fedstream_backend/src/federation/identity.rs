use super::FederationError;
use url::Url;

/// Classification of an identifier URL: owned by this instance (numeric
/// primary key) or by a peer (opaque URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedId {
    Local { id: i64 },
    Remote { url: Url },
}

/// Classifies identifier URLs against this instance's own authority. The
/// resolver is a pure function of its configuration; resolving the same
/// identifier twice always yields the same answer.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    own_authority: String,
}

impl IdentityResolver {
    pub fn new(public_url: &str) -> Result<Self, FederationError> {
        let parsed = Url::parse(public_url)
            .map_err(|_| FederationError::MalformedIdentifier(public_url.to_string()))?;
        Ok(Self {
            own_authority: authority_of(&parsed),
        })
    }

    pub fn resolve(&self, identifier: &str) -> Result<ResolvedId, FederationError> {
        let parsed = Url::parse(identifier)
            .map_err(|_| FederationError::MalformedIdentifier(identifier.to_string()))?;
        if authority_of(&parsed) == self.own_authority {
            let id = trailing_id(&parsed)
                .ok_or_else(|| FederationError::MalformedIdentifier(identifier.to_string()))?;
            Ok(ResolvedId::Local { id })
        } else {
            Ok(ResolvedId::Remote { url: parsed })
        }
    }
}

fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Extracts the numeric id from the last path segment, tolerating a
/// trailing slash.
pub fn trailing_id(url: &Url) -> Option<i64> {
    trailing_segment(url)?.parse().ok()
}

pub fn trailing_segment(url: &Url) -> Option<&str> {
    url.path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}
