//! Per-run sync counters and the end-of-run summary.
//!
//! Counters live in memory only; `summary()` takes an immutable snapshot so
//! an interrupted run still reports everything processed up to that point.

use crate::model::MergeOutcome;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityKind {
    Post,
    Video,
    Campaign,
    AdSet,
    Ad,
    PromotedPost,
    Insight,
    Mapping,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Post => "posts",
            EntityKind::Video => "videos",
            EntityKind::Campaign => "campaigns",
            EntityKind::AdSet => "adsets",
            EntityKind::Ad => "ads",
            EntityKind::PromotedPost => "promoted_posts",
            EntityKind::Insight => "insights",
            EntityKind::Mapping => "mappings",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub fetched: u64,
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// In-memory tally of sync outcomes, grouped by entity kind.
#[derive(Debug, Default)]
pub struct SyncStats {
    kinds: BTreeMap<EntityKind, Counters>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, kind: EntityKind) -> &mut Counters {
        self.kinds.entry(kind).or_default()
    }

    pub fn fetched(&mut self, kind: EntityKind, count: u64) {
        self.entry(kind).fetched += count;
    }

    pub fn record(&mut self, kind: EntityKind, outcome: MergeOutcome) {
        let c = self.entry(kind);
        match outcome {
            MergeOutcome::Created => c.new += 1,
            MergeOutcome::Updated => c.updated += 1,
            MergeOutcome::Unchanged => c.unchanged += 1,
        }
    }

    /// Bulk tally for passes that report a single new-or-updated count
    /// (the cross-reference pass cannot split the two).
    pub fn bulk_merged(&mut self, kind: EntityKind, count: u64) {
        self.entry(kind).updated += count;
    }

    pub fn skipped(&mut self, kind: EntityKind) {
        self.entry(kind).skipped += 1;
    }

    pub fn error(&mut self, kind: EntityKind) {
        self.entry(kind).errors += 1;
    }

    pub fn counters(&self, kind: EntityKind) -> Counters {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    /// Immutable snapshot of everything tallied so far.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            rows: self.kinds.iter().map(|(k, c)| (*k, *c)).collect(),
        }
    }
}

/// Immutable end-of-run snapshot, safe to print after partial failure.
#[derive(Debug, Clone)]
pub struct RunSummary {
    rows: Vec<(EntityKind, Counters)>,
}

impl RunSummary {
    pub fn rows(&self) -> &[(EntityKind, Counters)] {
        &self.rows
    }

    pub fn counters(&self, kind: EntityKind) -> Counters {
        self.rows
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    pub fn total_errors(&self) -> u64 {
        self.rows.iter().map(|(_, c)| c.errors).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=<72}", "")?;
        writeln!(
            f,
            "{:<16} {:>8} {:>8} {:>8} {:>9} {:>8} {:>8}",
            "kind", "fetched", "new", "updated", "unchanged", "skipped", "errors"
        )?;
        for (kind, c) in &self.rows {
            writeln!(
                f,
                "{:<16} {:>8} {:>8} {:>8} {:>9} {:>8} {:>8}",
                kind.as_str(),
                c.fetched,
                c.new,
                c.updated,
                c.unchanged,
                c.skipped,
                c.errors
            )?;
        }
        write!(f, "{:=<72}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_outcomes_per_kind() {
        let mut stats = SyncStats::new();
        stats.fetched(EntityKind::Ad, 3);
        stats.record(EntityKind::Ad, MergeOutcome::Created);
        stats.record(EntityKind::Ad, MergeOutcome::Updated);
        stats.record(EntityKind::Ad, MergeOutcome::Unchanged);
        stats.error(EntityKind::Ad);
        stats.skipped(EntityKind::Post);

        let ads = stats.counters(EntityKind::Ad);
        assert_eq!(ads.fetched, 3);
        assert_eq!(ads.new, 1);
        assert_eq!(ads.updated, 1);
        assert_eq!(ads.unchanged, 1);
        assert_eq!(ads.errors, 1);
        assert_eq!(stats.counters(EntityKind::Post).skipped, 1);
    }

    #[test]
    fn summary_is_a_snapshot() {
        let mut stats = SyncStats::new();
        stats.record(EntityKind::Video, MergeOutcome::Created);
        let summary = stats.summary();
        stats.record(EntityKind::Video, MergeOutcome::Created);

        assert_eq!(summary.counters(EntityKind::Video).new, 1);
        assert_eq!(stats.counters(EntityKind::Video).new, 2);
    }

    #[test]
    fn total_errors_spans_kinds() {
        let mut stats = SyncStats::new();
        stats.error(EntityKind::Ad);
        stats.error(EntityKind::Insight);
        assert_eq!(stats.summary().total_errors(), 2);
    }

    #[test]
    fn display_names_every_kind_row() {
        let mut stats = SyncStats::new();
        stats.record(EntityKind::Ad, MergeOutcome::Created);
        stats.record(EntityKind::Mapping, MergeOutcome::Updated);
        let text = stats.summary().to_string();
        assert!(text.contains("ads"));
        assert!(text.contains("mappings"));
    }
}
