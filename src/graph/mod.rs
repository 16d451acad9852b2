use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::Facebook;
use crate::model::InsightValue;
use crate::graph::model::{
    AdInsightRecord, AdRecord, AdSetRecord, AttachmentRecord, CampaignRecord, MetricEntry,
    PageEnvelope, PostRecord, VideoRecord,
};

pub mod model;

/// Post-level metrics still served by the current API version.
const POST_METRICS: &[&str] = &[
    "post_impressions",
    "post_impressions_unique",
    "post_clicks",
    "post_reactions_by_type_total",
];

/// Graph error codes the platform documents as throttling.
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("rate limited by graph api: {0}")]
    RateLimited(String),
    #[error("graph server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("graph request rejected {status}: {body}")]
    BadRequest { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid graph url: {0}")]
    InvalidUrl(String),
}

impl GraphError {
    /// Rate limits, 5xx and transport failures are worth another attempt;
    /// a rejected request or undecodable body is terminal for that call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphError::RateLimited(_) | GraphError::Server { .. } | GraphError::Transport(_)
        )
    }
}

/// Remote data source seam consumed by the sync engine. Implemented by
/// [`GraphClient`] in production and by recording doubles in tests.
#[async_trait]
pub trait GraphService: Send + Sync {
    async fn fetch_posts(
        &self,
        page_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostRecord>, GraphError>;

    async fn fetch_videos(
        &self,
        page_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoRecord>, GraphError>;

    async fn fetch_campaigns(&self, account_id: &str) -> Result<Vec<CampaignRecord>, GraphError>;

    async fn fetch_adsets(&self, account_id: &str) -> Result<Vec<AdSetRecord>, GraphError>;

    async fn fetch_ads(
        &self,
        account_id: &str,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdRecord>, GraphError>;

    /// Fetch a single post by id. Promoted posts never appear in the feed,
    /// so the engine resolves them one by one. `Ok(None)` means the remote
    /// rejected the id (deleted or inaccessible), which the caller skips.
    async fn fetch_post(&self, post_id: &str) -> Result<Option<PostRecord>, GraphError>;

    async fn fetch_post_attachments(
        &self,
        post_id: &str,
    ) -> Result<Vec<AttachmentRecord>, GraphError>;

    async fn fetch_post_insights(
        &self,
        post_id: &str,
    ) -> Result<Vec<(String, InsightValue)>, GraphError>;

    /// Account-level ad performance rows for a date range (`level=ad`).
    async fn fetch_ad_insights(
        &self,
        account_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AdInsightRecord>, GraphError>;
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    access_token: String,
    page_size: u32,
    pace: Duration,
    max_retries: u32,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn from_config(cfg: &Facebook, access_token: &str) -> Result<Self, GraphError> {
        let base_url = Url::parse(&cfg.api_base)
            .map_err(|e| GraphError::InvalidUrl(format!("{}: {}", cfg.api_base, e)))?;
        Ok(Self::with_base_url(
            access_token.to_string(),
            base_url,
            cfg.page_size,
            Duration::from_millis(cfg.pace_ms),
            cfg.max_retries,
        ))
    }

    pub fn with_base_url(
        access_token: String,
        base_url: Url,
        page_size: u32,
        pace: Duration,
        max_retries: u32,
    ) -> Self {
        let http = Client::builder()
            .user_agent("fb-adsync/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            access_token,
            page_size,
            pace,
            max_retries,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GraphError> {
        self.base_url
            .join(path)
            .map_err(|e| GraphError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn collection_url(&self, path: &str, fields: &str) -> Result<Url, GraphError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("fields", fields)
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("access_token", &self.access_token);
        Ok(url)
    }

    /// One paced, retried GET returning the raw JSON body. Rate limits and
    /// 5xx back off exponentially up to the configured attempt cap.
    async fn get_json(&self, url: &Url) -> Result<Value, GraphError> {
        let mut attempt: u32 = 0;
        loop {
            tokio::time::sleep(self.pace).await;
            match self.request_once(url).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff_delay(attempt);
                    warn!(?err, attempt, backoff_ms = backoff.as_millis() as u64, "graph call failed; backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_once(&self, url: &Url) -> Result<Value, GraphError> {
        let res = self.http.get(url.clone()).send().await?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(GraphError::RateLimited(body));
        }
        if status.is_server_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(GraphError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let body = res.text().await?;
        if !status.is_success() {
            // Throttling often arrives as 400 with a documented error code.
            if let Some(code) = graph_error_code(&body) {
                if RATE_LIMIT_CODES.contains(&code) {
                    return Err(GraphError::RateLimited(body));
                }
            }
            return Err(GraphError::BadRequest {
                status: status.as_u16(),
                body,
            });
        }
        let value: Value = serde_json::from_str(&body)?;
        if let Some(code) = value.get("error").and_then(|e| e.get("code")).and_then(Value::as_i64) {
            if RATE_LIMIT_CODES.contains(&code) {
                return Err(GraphError::RateLimited(value["error"].to_string()));
            }
            return Err(GraphError::BadRequest {
                status: status.as_u16(),
                body: value["error"].to_string(),
            });
        }
        Ok(value)
    }

    /// Walk `paging.next` links until the collection is exhausted.
    async fn fetch_paged<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, GraphError> {
        let mut all = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let body = self.get_json(&url).await?;
            let page: PageEnvelope<T> = serde_json::from_value(body)?;
            all.extend(page.data);
            next = match page.paging.and_then(|p| p.next) {
                Some(raw) => Some(
                    Url::parse(&raw).map_err(|e| GraphError::InvalidUrl(format!("{}: {}", raw, e)))?,
                ),
                None => None,
            };
        }
        Ok(all)
    }

    fn normalize_account_id(account_id: &str) -> String {
        if account_id.starts_with("act_") {
            account_id.to_string()
        } else {
            format!("act_{}", account_id)
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    // 500ms * 2^attempt, capped at 30s.
    let ms = 500u64.saturating_mul(1 << attempt.min(10));
    Duration::from_millis(ms.min(30_000))
}

fn graph_error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("code")?
        .as_i64()
}

#[async_trait]
impl GraphService for GraphClient {
    async fn fetch_posts(
        &self,
        page_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostRecord>, GraphError> {
        let mut url = self.collection_url(
            &format!("{}/feed", page_id),
            "id,created_time,message,story,is_published,is_hidden,permalink_url,full_picture",
        )?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.timestamp().to_string());
        }
        self.fetch_paged(url).await
    }

    async fn fetch_videos(
        &self,
        page_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoRecord>, GraphError> {
        let url = self.collection_url(
            &format!("{}/videos", page_id),
            "id,title,description,created_time,length,source,picture,permalink_url,views",
        )?;
        let videos: Vec<VideoRecord> = self.fetch_paged(url).await?;
        // The videos edge has no server-side since filter; trim client-side.
        Ok(match since {
            Some(since) => videos
                .into_iter()
                .filter(|v| {
                    model::parse_graph_time_opt(v.created_time.as_deref())
                        .map(|t| t >= since)
                        .unwrap_or(true)
                })
                .collect(),
            None => videos,
        })
    }

    async fn fetch_campaigns(&self, account_id: &str) -> Result<Vec<CampaignRecord>, GraphError> {
        let account = Self::normalize_account_id(account_id);
        let url = self.collection_url(
            &format!("{}/campaigns", account),
            "id,name,status,objective,daily_budget,lifetime_budget,created_time,updated_time",
        )?;
        self.fetch_paged(url).await
    }

    async fn fetch_adsets(&self, account_id: &str) -> Result<Vec<AdSetRecord>, GraphError> {
        let account = Self::normalize_account_id(account_id);
        let url = self.collection_url(
            &format!("{}/adsets", account),
            "id,campaign_id,name,status,daily_budget,lifetime_budget,created_time,updated_time",
        )?;
        self.fetch_paged(url).await
    }

    async fn fetch_ads(
        &self,
        account_id: &str,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdRecord>, GraphError> {
        let account = Self::normalize_account_id(account_id);
        let mut url = self.collection_url(
            &format!("{}/ads", account),
            "id,adset_id,name,status,creative{object_story_id,effective_object_story_id,id,name,video_id,object_type},preview_shareable_link,created_time,updated_time",
        )?;
        if let Some(since) = updated_since {
            let filtering = json!([{
                "field": "ad.updated_time",
                "operator": "GREATER_THAN",
                "value": since.timestamp(),
            }]);
            url.query_pairs_mut()
                .append_pair("filtering", &filtering.to_string());
        }
        self.fetch_paged(url).await
    }

    async fn fetch_post(&self, post_id: &str) -> Result<Option<PostRecord>, GraphError> {
        let mut url = self.endpoint(post_id)?;
        url.query_pairs_mut()
            .append_pair(
                "fields",
                "id,message,story,created_time,permalink_url,full_picture",
            )
            .append_pair("access_token", &self.access_token);
        match self.get_json(&url).await {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            Err(GraphError::BadRequest { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn fetch_post_attachments(
        &self,
        post_id: &str,
    ) -> Result<Vec<AttachmentRecord>, GraphError> {
        let url = self.collection_url(
            &format!("{}/attachments", post_id),
            "media,type,description,title",
        )?;
        self.fetch_paged(url).await
    }

    async fn fetch_post_insights(
        &self,
        post_id: &str,
    ) -> Result<Vec<(String, InsightValue)>, GraphError> {
        let mut out = Vec::new();

        for metric in POST_METRICS {
            let mut url = self.endpoint(&format!("{}/insights", post_id))?;
            url.query_pairs_mut()
                .append_pair("metric", metric)
                .append_pair("access_token", &self.access_token);
            let body = match self.get_json(&url).await {
                Ok(body) => body,
                Err(err) => {
                    // One unavailable metric must not lose the rest.
                    warn!(?err, post_id, metric, "metric fetch failed; skipping");
                    continue;
                }
            };
            let page: PageEnvelope<MetricEntry> = serde_json::from_value(body)?;
            for entry in page.data {
                let Some(name) = entry.name else { continue };
                let Some(value) = entry.values.first().and_then(|v| v.value.clone()) else {
                    continue;
                };
                out.push((name, classify_metric_value(value)));
            }
        }

        // Engagement counters come from the object itself, not /insights.
        let mut url = self.endpoint(post_id)?;
        url.query_pairs_mut()
            .append_pair("fields", "shares,comments.summary(true),likes.summary(true)")
            .append_pair("access_token", &self.access_token);
        match self.get_json(&url).await {
            Ok(body) => {
                let shares = body
                    .pointer("/shares/count")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let comments = body
                    .pointer("/comments/summary/total_count")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let likes = body
                    .pointer("/likes/summary/total_count")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                out.push(("share_count".into(), InsightValue::Numeric(shares)));
                out.push(("comment_count".into(), InsightValue::Numeric(comments)));
                out.push(("like_count".into(), InsightValue::Numeric(likes)));
            }
            Err(err) => warn!(?err, post_id, "engagement fetch failed; skipping"),
        }

        Ok(out)
    }

    async fn fetch_ad_insights(
        &self,
        account_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AdInsightRecord>, GraphError> {
        let account = Self::normalize_account_id(account_id);
        let mut url = self.collection_url(
            &format!("{}/insights", account),
            "campaign_id,adset_id,ad_id,impressions,reach,clicks,spend,ctr,cpc,cpm,actions,date_start,date_stop",
        )?;
        let time_range = json!({ "since": since.to_string(), "until": until.to_string() });
        url.query_pairs_mut()
            .append_pair("level", "ad")
            .append_pair("time_range", &time_range.to_string());
        self.fetch_paged(url).await
    }
}

fn classify_metric_value(value: Value) -> InsightValue {
    match value.as_f64() {
        Some(n) => InsightValue::Numeric(n),
        None => InsightValue::Structured(value),
    }
}
