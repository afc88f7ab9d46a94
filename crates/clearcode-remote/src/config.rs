use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the target root URL.
pub const TARGET_URL_ENV: &str = "CLEARCODE_TARGET_API_URL";

fn default_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    1
}

fn default_identity_field() -> String {
    "uuid".to_owned()
}

fn default_conflict_retries() -> u32 {
    1
}

/// Settings for reaching and replicating to a target deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API root, e.g. `https://host/api/v2`. Stored without a trailing slash.
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Upper bound for each individual request, connect through body.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Items of one endpoint processed concurrently. 1 is sequential.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Payload field holding the record identity.
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
    /// Re-probes allowed after a create is rejected with 409 Conflict.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
            identity_field: default_identity_field(),
            conflict_retries: default_conflict_retries(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Resolve the target: explicit URL, then `CLEARCODE_TARGET_API_URL`,
    /// then the default config file.
    pub fn resolve(url: Option<&str>) -> Result<Self, RemoteError> {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            return Ok(Self::new(url));
        }
        if let Ok(url) = std::env::var(TARGET_URL_ENV) {
            if !url.trim().is_empty() {
                return Ok(Self::new(&url));
            }
        }
        Self::load_default().map_err(|e| {
            RemoteError::Config(format!(
                "a target instance API root URL is required; provide one with --target-url \
                 or set it in the {TARGET_URL_ENV} environment variable ({e})"
            ))
        })
    }

    /// Load config from `~/.config/clearcode/remote.json`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))?;
        config.url = config.url.trim_end_matches('/').to_owned();
        config.workers = config.workers.max(1);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/clearcode/remote.json"))
}
