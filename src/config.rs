//! Configuration loader and validator for the Facebook ads/content syncer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub facebook: Facebook,
    pub sync: SyncSettings,
    pub classifier: ClassifierTables,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub media_queue_capacity: usize,
}

/// Graph API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Facebook {
    pub api_base: String,
    pub access_tokens: Vec<String>,
    pub page_ids: Vec<String>,
    pub ad_account_ids: Vec<String>,
    pub page_size: u32,
    pub pace_ms: u64,
    pub max_retries: u32,
}

/// Incremental sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub buffer_hours: i64,
    pub backfill_days: i64,
    pub promoted_post_limit: i64,
}

/// Video-detection tables for the content classifier. Kept in configuration
/// so deployments can tune the marker/keyword lists without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifierTables {
    pub video_url_markers: Vec<String>,
    pub video_keywords_th: Vec<String>,
    pub video_keywords_en: Vec<String>,
    pub video_attachment_types: Vec<String>,
}

impl Default for ClassifierTables {
    fn default() -> Self {
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            video_url_markers: strings(&[
                "/videos/",
                "facebook.com/watch",
                "facebook.com/video",
                "fb.watch",
                "/reel/",
                "facebook.com/reel",
                "youtube.com/watch",
                "youtu.be/",
            ]),
            video_keywords_th: strings(&["วิดีโอ", "รูปเคลื่อนไหว", "คลิป", "วีดีโอ", "คลิ๊ป"]),
            video_keywords_en: strings(&["video", "clip", "watch", "reel", "movie", "film"]),
            video_attachment_types: strings(&[
                "video_inline",
                "video",
                "video_autoplay",
                "video_share",
            ]),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.facebook.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("facebook.api_base must be non-empty"));
    }
    if cfg.facebook.access_tokens.is_empty()
        || cfg.facebook.access_tokens.iter().any(|t| t.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "facebook.access_tokens must contain at least one non-empty token",
        ));
    }
    if cfg.facebook.page_size == 0 {
        return Err(ConfigError::Invalid("facebook.page_size must be > 0"));
    }
    if cfg.facebook.page_ids.is_empty() && cfg.facebook.ad_account_ids.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one of facebook.page_ids or facebook.ad_account_ids must be set",
        ));
    }

    if cfg.sync.buffer_hours < 0 {
        return Err(ConfigError::Invalid("sync.buffer_hours must be >= 0"));
    }
    if cfg.sync.backfill_days <= 0 {
        return Err(ConfigError::Invalid("sync.backfill_days must be > 0"));
    }
    if cfg.sync.promoted_post_limit <= 0 {
        return Err(ConfigError::Invalid("sync.promoted_post_limit must be > 0"));
    }

    if cfg.classifier.video_url_markers.is_empty() {
        return Err(ConfigError::Invalid(
            "classifier.video_url_markers must be non-empty",
        ));
    }
    if cfg.classifier.video_attachment_types.is_empty() {
        return Err(ConfigError::Invalid(
            "classifier.video_attachment_types must be non-empty",
        ));
    }

    Ok(())
}

/// Example YAML configuration; parsed in tests to keep it valid.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  media_queue_capacity: 64

facebook:
  api_base: "https://graph.facebook.com/v23.0/"
  access_tokens:
    - "YOUR_USER_ACCESS_TOKEN"
  page_ids:
    - "107038946030147"
  ad_account_ids:
    - "act_486765798095431"
  page_size: 100
  pace_ms: 300
  max_retries: 4

sync:
  buffer_hours: 1
  backfill_days: 7
  promoted_post_limit: 100

classifier:
  video_url_markers:
    - "/videos/"
    - "facebook.com/watch"
    - "facebook.com/video"
    - "fb.watch"
    - "/reel/"
    - "facebook.com/reel"
    - "youtube.com/watch"
    - "youtu.be/"
  video_keywords_th:
    - "วิดีโอ"
    - "รูปเคลื่อนไหว"
    - "คลิป"
    - "วีดีโอ"
    - "คลิ๊ป"
  video_keywords_en:
    - "video"
    - "clip"
    - "watch"
    - "reel"
    - "movie"
    - "film"
  video_attachment_types:
    - "video_inline"
    - "video"
    - "video_autoplay"
    - "video_share"
"#
}
