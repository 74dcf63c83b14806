//! Core domain model for the IdeaConnect ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ideaconnect-core";

/// Rough market-size bucket inferred from dollar amounts on the source page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketSize {
    Small,
    Medium,
    Large,
}

impl MarketSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketSize::Small => "Small",
            MarketSize::Medium => "Medium",
            MarketSize::Large => "Large",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "Small" => Some(MarketSize::Small),
            "Medium" => Some(MarketSize::Medium),
            "Large" => Some(MarketSize::Large),
            _ => None,
        }
    }
}

/// Transient extracted idea awaiting validation, deduplication, and
/// persistence. Never stored itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    /// Derived from the URL slug, or a synthetic fallback such as
    /// `historical-2026-08-28-0` when no slug is available.
    pub source_identifier: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub source_url: Option<String>,
    pub difficulty_level: Option<u8>,
    pub market_size: Option<MarketSize>,
    pub search_volume: Option<f64>,
    pub growth_rate: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl RawCandidate {
    pub fn new(source_identifier: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            title: title.into(),
            description: description.into(),
            category: DEFAULT_CATEGORY.to_string(),
            source_url: None,
            difficulty_level: None,
            market_size: None,
            search_volume: None,
            growth_rate: None,
            discovered_at: Utc::now(),
        }
    }
}

/// Category applied when the source page carries no category of its own.
pub const DEFAULT_CATEGORY: &str = "Startup Idea";

/// Canonical persisted idea. Owned by the external store; the pipeline only
/// reads and writes it through the store seam.
///
/// Invariant: at most one record has `is_featured == true` at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIdea {
    pub id: Uuid,
    pub source_identifier: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub skills: Vec<String>,
    pub difficulty_level: Option<u8>,
    pub market_size: Option<MarketSize>,
    pub source_url: Option<String>,
    pub is_featured: bool,
    pub featured_date: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

/// A persisted idea joined with its engagement counters, used when picking
/// the featured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaEngagement {
    pub idea: PersistedIdea,
    pub interest_count: i64,
    pub discussion_count: i64,
}

impl IdeaEngagement {
    /// Weighted engagement score: interests count double, discussions triple.
    pub fn score(&self) -> i64 {
        self.interest_count * 2 + self.discussion_count * 3
    }
}

/// Outcome summary of one sync invocation. Created fresh per run, returned
/// to the trigger layer, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced: usize,
    pub skipped: usize,
    pub cleaned: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_score_weights_discussions_over_interests() {
        let idea = PersistedIdea {
            id: Uuid::new_v4(),
            source_identifier: None,
            title: "t".into(),
            description: "d".into(),
            category: DEFAULT_CATEGORY.into(),
            skills: vec![],
            difficulty_level: None,
            market_size: None,
            source_url: None,
            is_featured: false,
            featured_date: None,
            synced_at: Utc::now(),
        };
        let engagement = IdeaEngagement {
            idea,
            interest_count: 4,
            discussion_count: 3,
        };
        assert_eq!(engagement.score(), 17);
    }

    #[test]
    fn market_size_round_trips_through_str() {
        for size in [MarketSize::Small, MarketSize::Medium, MarketSize::Large] {
            assert_eq!(MarketSize::from_str_opt(size.as_str()), Some(size));
        }
        assert_eq!(MarketSize::from_str_opt("Enormous"), None);
    }
}
