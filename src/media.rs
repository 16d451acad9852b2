//! Local media cache for thumbnails and attachment stills.
//!
//! Platform CDN URLs expire after a day or two, so anything worth showing
//! later is copied into `{data_dir}/media/{category}/`. Storing is
//! idempotent on the source URL. Downloads triggered from the sync loop go
//! through a bounded fire-and-forget queue: best-effort, non-blocking, and
//! a failed download never fails the record that referenced it.

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::db::repo::{self, Pool};

pub const PLACEHOLDER_URL: &str = "/static/placeholder.svg";

static SAFE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"));

/// Stable media id derived from category and source id; doubles as the
/// cached file's stem.
pub fn media_id(category: &str, source_id: &str) -> String {
    format!(
        "{}_{}",
        SAFE_ID.replace_all(category, ""),
        SAFE_ID.replace_all(source_id, "")
    )
}

#[derive(Clone)]
pub struct MediaStore {
    root: PathBuf,
    http: Client,
}

impl MediaStore {
    pub fn new(data_dir: &str) -> Self {
        let http = Client::builder()
            .user_agent("fb-adsync/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            root: Path::new(data_dir).join("media"),
            http,
        }
    }

    pub fn media_path(&self, category: &str, source_id: &str) -> PathBuf {
        self.root
            .join(SAFE_ID.replace_all(category, "").as_ref())
            .join(format!("{}.jpg", media_id(category, source_id)))
    }

    /// Cache a remote image locally. Returns the media id, or `None` when
    /// the URL does not resolve to an image. Calling twice with the same URL
    /// returns the existing id without re-downloading.
    pub async fn store_media_from_url(
        &self,
        pool: &Pool,
        url: &str,
        category: &str,
        source_id: &str,
        source_kind: &str,
    ) -> Result<Option<String>> {
        if url.trim().is_empty() {
            return Ok(None);
        }

        if let Some(existing) = repo::find_media_by_url(pool, url).await? {
            return Ok(Some(existing));
        }

        let id = media_id(category, source_id);
        let path = self.media_path(category, source_id);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let res = self.http.get(url).send().await?;
            if !res.status().is_success() {
                return Ok(None);
            }
            let content_type = res
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !content_type.starts_with("image/") {
                return Ok(None);
            }
            let bytes = res.bytes().await?;

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create media dir: {}", parent.display()))?;
            }
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("failed to write media file: {}", path.display()))?;
        }

        repo::record_media_asset(
            pool,
            &id,
            url,
            &path.to_string_lossy(),
            category,
            source_id,
            source_kind,
            Utc::now(),
        )
        .await?;
        Ok(Some(id))
    }

    /// Best display URL: local cache (never expires), else the remote URL
    /// (may expire), else the placeholder.
    pub fn best_thumbnail_url(
        &self,
        category: &str,
        source_id: &str,
        remote_url: Option<&str>,
    ) -> String {
        let path = self.media_path(category, source_id);
        if path.exists() {
            return format!("/media/{}/{}.jpg", category, media_id(category, source_id));
        }
        match remote_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => PLACEHOLDER_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaJob {
    pub url: String,
    pub category: String,
    pub source_id: String,
    pub source_kind: String,
}

/// Bounded fire-and-forget download queue. A full queue drops the job; the
/// sync loop never waits on media.
#[derive(Clone)]
pub struct MediaQueue {
    tx: mpsc::Sender<MediaJob>,
}

impl MediaQueue {
    pub fn spawn(store: MediaStore, pool: Pool, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<MediaJob>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match store
                    .store_media_from_url(
                        &pool,
                        &job.url,
                        &job.category,
                        &job.source_id,
                        &job.source_kind,
                    )
                    .await
                {
                    Ok(Some(media_id)) => {
                        if job.source_kind == "content" {
                            if let Err(err) = repo::mark_content_local_thumbnail(
                                &pool,
                                &job.source_id,
                                &media_id,
                                Utc::now(),
                            )
                            .await
                            {
                                warn!(?err, source_id = %job.source_id, "failed to link cached media");
                            }
                        }
                        info!(media_id, url = %job.url, "cached media");
                    }
                    Ok(None) => {
                        info!(url = %job.url, "media url did not resolve to an image");
                    }
                    Err(err) => {
                        warn!(?err, url = %job.url, "media download failed");
                    }
                }
            }
        });
        Self { tx }
    }

    /// Non-blocking; a full queue drops the job.
    pub fn enqueue(&self, job: MediaJob) {
        if let Err(err) = self.tx.try_send(job) {
            warn!(%err, "media queue full; dropping download job");
        }
    }
}
