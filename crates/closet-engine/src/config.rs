use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::limiter::RateLimitConfig;
use crate::remote::DEFAULT_API_BASE;

pub const CONFIG_FILE_NAME: &str = "closet.json";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_BUCKET: &str = "outfits";
pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 120;

/// How the transfer cache key identifies an inspiration photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFingerprint {
    /// File name plus byte size.
    #[default]
    NameSize,
    /// SHA-256 of the file contents.
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosetConfig {
    pub model: String,
    pub api_base: String,
    /// Mannequin photo every generation dresses. Relative paths resolve
    /// against the data directory.
    pub body_reference: Option<PathBuf>,
    pub bucket: String,
    pub public_base: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub transfer_fingerprint: TransferFingerprint,
    pub request_timeout_s: u64,
    /// Environment only; never written to or read from the config file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ClosetConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            body_reference: None,
            bucket: DEFAULT_BUCKET.to_string(),
            public_base: None,
            rate_limit: RateLimitConfig::default(),
            transfer_fingerprint: TransferFingerprint::default(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            api_key: None,
        }
    }
}

impl ClosetConfig {
    /// Reads `closet.json` from `data_dir` (defaults when absent), resolves
    /// relative paths, then applies environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = Self::from_file(&path)?;
        if let Some(body) = config.body_reference.take() {
            config.body_reference = Some(if body.is_absolute() {
                body
            } else {
                data_dir.join(body)
            });
        }
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
        {
            self.api_key = Some(key);
        }
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            self.api_base = base.trim_end_matches('/').to_string();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s.clamp(1, 600))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
