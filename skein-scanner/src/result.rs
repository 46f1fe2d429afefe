use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::parser::{PageMetadata, ParsedPage};

/// One successfully fetched page. Immutable once the crawler emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub depth: usize,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub content_length: usize,
    pub links_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PageMetadata>,
    pub response_time: Duration,
    pub from_cache: bool,
    pub timestamp: DateTime<Utc>,
}

/// A fetched and parsed page as stored in the page cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFetchResult {
    pub url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub content_length: usize,
    pub response_time: Duration,
    pub page: ParsedPage,
    pub fetched_at: DateTime<Utc>,
}

/// A per-URL failure captured during traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlErrorRecord {
    pub url: String,
    pub depth: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl CrawlErrorRecord {
    pub fn new(url: impl Into<String>, depth: usize, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Audit record of one admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub url: String,
    pub allowed: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl FilterDecision {
    pub fn new(url: impl Into<String>, allowed: bool, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            allowed,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    pub anchor_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub context: String,
}

impl EdgeMetadata {
    /// Fraction of metadata fields carrying a value, in `[0, 1]`.
    pub fn density(&self) -> f64 {
        let filled = [
            !self.anchor_text.trim().is_empty(),
            self.title.as_deref().is_some_and(|t| !t.trim().is_empty()),
            !self.context.trim().is_empty(),
        ]
        .iter()
        .filter(|f| **f)
        .count();
        filled as f64 / 3.0
    }
}

/// A discovered hyperlink. The same pair may appear more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub from: String,
    pub to: String,
    pub metadata: EdgeMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSummary {
    pub total: usize,
    pub allowed: usize,
    pub blocked: usize,
    pub by_reason: BTreeMap<String, usize>,
}

impl FilterSummary {
    pub fn from_decisions(decisions: &[FilterDecision]) -> Self {
        let mut summary = FilterSummary::default();
        for decision in decisions {
            summary.total += 1;
            if decision.allowed {
                summary.allowed += 1;
            } else {
                summary.blocked += 1;
                *summary.by_reason.entry(decision.reason.clone()).or_insert(0) += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub pages_blocked: usize,
    pub robots_blocked: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub links_discovered: usize,
    pub external_links: usize,
    pub max_depth_reached: usize,
    /// 3xx responses whose target went back through admission.
    #[serde(default)]
    pub redirects: usize,
    pub stopped: bool,
    pub duration: Duration,
    pub filter: FilterSummary,
}

/// Everything one traversal produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub seed: String,
    pub urls: Vec<String>,
    pub results: Vec<PageRecord>,
    pub errors: Vec<CrawlErrorRecord>,
    pub filter_decisions: Vec<FilterDecision>,
    pub edges: Vec<LinkEdge>,
    pub stats: CrawlStats,
}
