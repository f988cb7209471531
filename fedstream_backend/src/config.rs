use anyhow::{anyhow, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FedstreamConfig {
    pub api_port: u16,
    /// Public base URL of this instance's API, e.g. `https://social.example.com/api/v1`.
    /// Remote identifiers whose host matches this URL's host are local.
    pub public_url: String,
    pub paths: FedstreamPaths,
    pub peer_timeout_secs: u64,
}

impl FedstreamConfig {
    pub fn from_env() -> Result<Self> {
        let paths = FedstreamPaths::discover()?;
        let api_port = env::var("FEDSTREAM_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080);
        let public_url = env::var("FEDSTREAM_PUBLIC_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| format!("http://127.0.0.1:{api_port}/api/v1"));
        let peer_timeout_secs = env::var("FEDSTREAM_PEER_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(5);
        Ok(Self {
            api_port,
            public_url: normalize_base_url(&public_url),
            paths,
            peer_timeout_secs,
        })
    }

    pub fn new(api_port: u16, public_url: impl Into<String>, paths: FedstreamPaths) -> Self {
        Self {
            api_port,
            public_url: normalize_base_url(&public_url.into()),
            paths,
            peer_timeout_secs: 5,
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Default)]
pub struct FedstreamPaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// JSON file holding the statically configured peer servers.
    pub peers_path: PathBuf,
}

impl FedstreamPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("fedstream.db");
        let peers_path = env::var("FEDSTREAM_PEERS_FILE")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join("peers.json"));

        Ok(Self {
            base,
            data_dir,
            db_path,
            peers_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_loses_trailing_slash() {
        let paths = FedstreamPaths::from_base_dir("/tmp/fedstream-test").unwrap();
        let config = FedstreamConfig::new(9000, "http://node.example/api/v1/", paths);
        assert_eq!(config.public_url, "http://node.example/api/v1");
    }

    #[test]
    fn paths_derive_from_base_dir() {
        let paths = FedstreamPaths::from_base_dir("/tmp/fedstream-test").unwrap();
        assert_eq!(paths.db_path, PathBuf::from("/tmp/fedstream-test/data/fedstream.db"));
    }
}
