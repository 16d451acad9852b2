use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content kind derived by the classifier. `Reel` and `Video` are the two
/// kinds the cross-reference resolver treats as promotable video content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Photo,
    Link,
    Album,
    Video,
    Reel,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Photo => "photo",
            ContentKind::Link => "link",
            ContentKind::Album => "album",
            ContentKind::Video => "video",
            ContentKind::Reel => "reel",
        }
    }

    pub fn parse_kind(s: &str) -> Option<ContentKind> {
        match s {
            "text" => Some(ContentKind::Text),
            "photo" => Some(ContentKind::Photo),
            "link" => Some(ContentKind::Link),
            "album" => Some(ContentKind::Album),
            "video" => Some(ContentKind::Video),
            "reel" => Some(ContentKind::Reel),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, ContentKind::Video | ContentKind::Reel)
    }
}

/// A sync target: a page owning organic content, or an ad account owning
/// the paid tree. Watermarks are resolved per owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOwner {
    Page(String),
    Account(String),
}

impl SyncOwner {
    pub fn id(&self) -> &str {
        match self {
            SyncOwner::Page(id) | SyncOwner::Account(id) => id,
        }
    }
}

impl std::fmt::Display for SyncOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOwner::Page(id) => write!(f, "page:{}", id),
            SyncOwner::Account(id) => write!(f, "account:{}", id),
        }
    }
}

/// Outcome of a single upsert, fed to the statistics aggregator.
/// `Unchanged` means the row existed and no descriptive field differed;
/// the `updated_at` bookkeeping column is still bumped in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    pub page_id: Option<String>,
    pub message: Option<String>,
    pub story: Option<String>,
    pub permalink_url: Option<String>,
    pub kind: ContentKind,
    pub thumbnail_url: Option<String>,
    pub local_thumbnail_id: Option<String>,
    pub video_length: Option<f64>,
    pub platform_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub ad_id: String,
    pub adset_id: Option<String>,
    pub account_id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub creative: Option<Value>,
    pub preview_url: Option<String>,
    pub promoted_post_id: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A metric snapshot carries exactly one of a numeric or a structured value.
/// Structured values (e.g. reactions-by-type breakdowns) are stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum InsightValue {
    Numeric(f64),
    Structured(Value),
}

impl InsightValue {
    pub fn numeric(&self) -> Option<f64> {
        match self {
            InsightValue::Numeric(v) => Some(*v),
            InsightValue::Structured(_) => None,
        }
    }

    pub fn structured(&self) -> Option<&Value> {
        match self {
            InsightValue::Numeric(_) => None,
            InsightValue::Structured(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRecord {
    pub owner_ref: String,
    pub metric_name: String,
    pub value: InsightValue,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRefMapping {
    pub organic_id: String,
    pub promoted_id: String,
    pub page_id: Option<String>,
    pub ad_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
