//! Wire models for Graph API responses.
//!
//! Identifiers are `Option<String>` on purpose: the sync engine rejects
//! records with a missing id before any write, rather than failing the
//! whole page at deserialization time. The `creative` payload is kept as an
//! opaque `serde_json::Value` and stored verbatim; only the load-bearing
//! fields are extracted through typed helpers.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One page of a paginated Graph collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub story: Option<String>,
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub full_picture: Option<String>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub is_hidden: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub views: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<String>,
    #[serde(default)]
    pub lifetime_budget: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdSetRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<String>,
    #[serde(default)]
    pub lifetime_budget: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub creative: Option<Value>,
    #[serde(default)]
    pub preview_shareable_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
}

impl AdRecord {
    /// The content id the platform delivers this ad against. Prefers
    /// `effective_object_story_id` over `object_story_id`, matching what the
    /// delivery system actually uses.
    pub fn promoted_post_id(&self) -> Option<String> {
        let creative = self.creative.as_ref()?;
        for key in ["effective_object_story_id", "object_story_id"] {
            if let Some(id) = creative.get(key).and_then(Value::as_str) {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
        None
    }

    /// Organic video id embedded in the creative, the only signal the
    /// cross-reference resolver is allowed to match on.
    pub fn creative_video_id(&self) -> Option<String> {
        self.creative
            .as_ref()?
            .get("video_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentRecord {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media: Option<Value>,
}

/// One row of account-level ad insights (`level=ad`). The API serves the
/// numeric metrics as strings; `actions` stays structured.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdInsightRecord {
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_stop: Option<String>,
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub reach: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub ctr: Option<String>,
    #[serde(default)]
    pub cpc: Option<String>,
    #[serde(default)]
    pub cpm: Option<String>,
    #[serde(default)]
    pub actions: Option<Value>,
}

impl AdInsightRecord {
    /// Metric name/value pairs present on this row.
    pub fn metrics(&self) -> Vec<(String, crate::model::InsightValue)> {
        use crate::model::InsightValue;

        let mut out = Vec::new();
        let numeric = [
            ("impressions", &self.impressions),
            ("reach", &self.reach),
            ("clicks", &self.clicks),
            ("spend", &self.spend),
            ("ctr", &self.ctr),
            ("cpc", &self.cpc),
            ("cpm", &self.cpm),
        ];
        for (name, raw) in numeric {
            if let Some(value) = raw.as_deref().and_then(|s| s.parse::<f64>().ok()) {
                out.push((name.to_string(), InsightValue::Numeric(value)));
            }
        }
        if let Some(actions) = &self.actions {
            out.push(("actions".to_string(), InsightValue::Structured(actions.clone())));
        }
        out
    }
}

/// Insights envelope: one metric entry with a list of period values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default = "Vec::new")]
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricValue {
    #[serde(default)]
    pub value: Option<Value>,
}

/// Parse a Graph timestamp. The API emits both RFC 3339 offsets (`+00:00`)
/// and the compact `+0000` form.
pub fn parse_graph_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_graph_time_opt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_graph_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_offset_forms() {
        let a = parse_graph_time("2023-12-17T10:30:00+0000").unwrap();
        let b = parse_graph_time("2023-12-17T10:30:00+00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_graph_time("yesterday").is_none());
    }

    #[test]
    fn promoted_post_id_prefers_effective_story() {
        let ad: AdRecord = serde_json::from_value(json!({
            "id": "6933147088806",
            "creative": {
                "object_story_id": "107_111",
                "effective_object_story_id": "107_943196201369931"
            }
        }))
        .unwrap();
        assert_eq!(ad.promoted_post_id().as_deref(), Some("107_943196201369931"));
    }

    #[test]
    fn promoted_post_id_falls_back_to_story_id() {
        let ad: AdRecord = serde_json::from_value(json!({
            "id": "1",
            "creative": { "object_story_id": "107_111" }
        }))
        .unwrap();
        assert_eq!(ad.promoted_post_id().as_deref(), Some("107_111"));
    }

    #[test]
    fn creative_video_id_requires_field() {
        let with: AdRecord = serde_json::from_value(json!({
            "id": "1",
            "creative": { "video_id": "864424596563204" }
        }))
        .unwrap();
        assert_eq!(with.creative_video_id().as_deref(), Some("864424596563204"));

        let without: AdRecord = serde_json::from_value(json!({
            "id": "2",
            "creative": { "object_type": "VIDEO" }
        }))
        .unwrap();
        assert!(without.creative_video_id().is_none());

        let none: AdRecord = serde_json::from_value(json!({ "id": "3" })).unwrap();
        assert!(none.creative_video_id().is_none());
    }

    #[test]
    fn ad_insight_metrics_parse_strings_and_keep_actions() {
        let row: AdInsightRecord = serde_json::from_value(json!({
            "ad_id": "A1",
            "date_start": "2026-08-01",
            "date_stop": "2026-08-01",
            "impressions": "1200",
            "spend": "34.56",
            "ctr": "not-a-number",
            "actions": [{"action_type": "link_click", "value": "9"}]
        }))
        .unwrap();

        let metrics = row.metrics();
        let names: Vec<&str> = metrics.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["impressions", "spend", "actions"]);
        assert_eq!(metrics[0].1, crate::model::InsightValue::Numeric(1200.0));
        assert_eq!(metrics[1].1, crate::model::InsightValue::Numeric(34.56));
    }

    #[test]
    fn page_envelope_defaults() {
        let page: PageEnvelope<PostRecord> = serde_json::from_value(json!({})).unwrap();
        assert!(page.data.is_empty());
        assert!(page.paging.is_none());

        let page: PageEnvelope<PostRecord> = serde_json::from_value(json!({
            "data": [{"id": "p1"}],
            "paging": {"next": "https://example/next"}
        }))
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(
            page.paging.unwrap().next.as_deref(),
            Some("https://example/next")
        );
    }
}
