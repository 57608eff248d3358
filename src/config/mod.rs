//! Engine configuration, loaded from an optional TOML file.
//!
//! ```toml
//! data_dir = "./data"
//! cache_ttl_secs = 3600
//!
//! [hasher]
//! remote_url = "http://127.0.0.1:8787"
//! fallback = true
//!
//! [limits]
//! max_keys_per_file = 10000
//! ```

mod server;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blob::BlobCache;
use crate::error::{Error, Result};
use crate::hash::{FallbackHasher, FallbackPolicy, RemoteHasher};

pub use server::ServerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Blob read cache TTL. Zero disables the cache.
    pub cache_ttl_secs: u64,
    /// Bound on every blob store call.
    pub request_timeout_ms: u64,
    pub hasher: HasherConfig,
    pub limits: ImportLimits,
    pub server: ServerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_ttl_secs: 3600,
            request_timeout_ms: 10_000,
            hasher: HasherConfig::default(),
            limits: ImportLimits::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherConfig {
    /// Base URL of a compute service. Hashing is local when unset.
    pub remote_url: Option<String>,
    pub timeout_ms: u64,
    /// Fall back to local hashing when the compute service fails.
    pub fallback: bool,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            timeout_ms: 5_000,
            fallback: true,
        }
    }
}

/// Upper bounds applied to an import before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportLimits {
    pub max_keys_per_file: usize,
    pub max_total_keys: usize,
    pub max_bytes_per_file: usize,
    pub max_total_bytes: usize,
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_keys_per_file: 10_000,
            max_total_keys: 200_000,
            max_bytes_per_file: 5 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Reads `path` if given; otherwise every field takes its default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("lingosync.db")
    }

    #[must_use]
    pub fn blob_cache(&self) -> BlobCache {
        BlobCache::new(Duration::from_secs(self.cache_ttl_secs))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn remote_hasher(&self) -> Result<Option<RemoteHasher>> {
        self.hasher
            .remote_url
            .as_deref()
            .map(|url| RemoteHasher::new(url, Duration::from_millis(self.hasher.timeout_ms)))
            .transpose()
            .map_err(Error::from)
    }

    pub fn build_hasher(&self) -> Result<FallbackHasher> {
        let Some(remote) = self.remote_hasher()? else {
            return Ok(FallbackHasher::local());
        };
        let policy = if self.hasher.fallback {
            FallbackPolicy::Secondary
        } else {
            FallbackPolicy::Propagate
        };
        Ok(FallbackHasher::with_remote(Arc::new(remote)).with_policy(policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.limits.max_keys_per_file, 10_000);
        assert_eq!(config.limits.max_total_bytes, 50 * 1024 * 1024);
        assert_eq!(config.db_path(), PathBuf::from("./data/lingosync.db"));
        assert_eq!(config.server.socket_addr().unwrap().port(), 8787);
    }

    #[test]
    fn test_partial_file() {
        let config = EngineConfig::from_toml(
            r#"
            data_dir = "/var/lib/lingosync"
            cache_ttl_secs = 0

            [hasher]
            remote_url = "http://compute:8787"
            fallback = false

            [limits]
            max_total_keys = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/lingosync"));
        assert!(config.blob_cache().ttl().is_zero());
        assert_eq!(config.hasher.timeout_ms, 5_000);
        assert_eq!(config.limits.max_total_keys, 50);
        assert_eq!(config.limits.max_keys_per_file, 10_000);

        let hasher = config.build_hasher().unwrap();
        assert_eq!(hasher.policy(), FallbackPolicy::Propagate);
    }

    #[test]
    fn test_load_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lingosync.toml");
        fs::write(&path, "cache_ttl_secs = \"soon\"").unwrap();

        let err = EngineConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("lingosync.toml")));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = EngineConfig::load(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
