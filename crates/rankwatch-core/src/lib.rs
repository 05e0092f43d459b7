//! Core domain model and position-extraction logic for Rankwatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod matching;

pub use matching::{find_ranking_position, target_matches, RankedMatch};

pub const CRATE_NAME: &str = "rankwatch-core";

/// Domain checked when a keyword carries no explicit target URL.
pub const DEFAULT_TARGET_DOMAIN: &str = "ubs.com";

/// A named collection of keywords sharing a default location/language,
/// owned by one tenant/team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Closed category set for tracked keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeywordCategory {
    Mortgages,
    AccountsCards,
    Investing,
    Pension,
    DigitalBanking,
}

impl KeywordCategory {
    pub const ALL: [KeywordCategory; 5] = [
        KeywordCategory::Mortgages,
        KeywordCategory::AccountsCards,
        KeywordCategory::Investing,
        KeywordCategory::Pension,
        KeywordCategory::DigitalBanking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordCategory::Mortgages => "Mortgages",
            KeywordCategory::AccountsCards => "Accounts&Cards",
            KeywordCategory::Investing => "Investing",
            KeywordCategory::Pension => "Pension",
            KeywordCategory::DigitalBanking => "Digital Banking",
        }
    }
}

impl std::fmt::Display for KeywordCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown keyword category: {0}")]
pub struct InvalidCategory(pub String);

impl std::str::FromStr for KeywordCategory {
    type Err = InvalidCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeywordCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| InvalidCategory(s.to_string()))
    }
}

/// A tracked search term. Unique per `(tracker_id, text)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub tracker_id: Uuid,
    pub text: String,
    pub target_url: Option<String>,
    pub category: Option<KeywordCategory>,
    pub search_volume: Option<i64>,
    pub volume_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Keyword {
    /// Target to match against SERP items: explicit URL or the default domain.
    pub fn effective_target(&self) -> &str {
        self.target_url
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TARGET_DOMAIN)
    }
}

/// One dated measurement of a keyword's position. Immutable once written;
/// the full sequence per keyword is its ranking history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingObservation {
    pub id: Uuid,
    pub keyword_id: Uuid,
    pub run_id: Uuid,
    pub observed_at: DateTime<Utc>,
    pub position: Option<u32>,
    pub matched_url: Option<String>,
}

/// Observation payload staged by the ingestion job before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
    pub keyword_id: Uuid,
    pub run_id: Uuid,
    pub observed_at: DateTime<Utc>,
    pub position: u32,
    pub matched_url: String,
}

/// A single SERP item as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerpItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub rank_absolute: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_paid: bool,
}

/// Per-keyword result set returned by a bulk provider call. Response order
/// is not guaranteed to match request order; callers match by `keyword`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResults {
    pub keyword: String,
    #[serde(default)]
    pub items: Vec<SerpItem>,
    #[serde(default)]
    pub items_count: u32,
}

/// Cached monthly search volume for one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchVolume {
    pub keyword: String,
    pub search_volume: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_display() {
        for cat in KeywordCategory::ALL {
            let parsed: KeywordCategory = cat.as_str().parse().unwrap();
            assert_eq!(parsed, cat);
        }
    }

    #[test]
    fn category_rejects_unknown_values() {
        assert!("Loans".parse::<KeywordCategory>().is_err());
        assert!("mortgages".parse::<KeywordCategory>().is_err());
    }

    #[test]
    fn effective_target_falls_back_to_default_domain() {
        let mut kw = Keyword {
            id: Uuid::new_v4(),
            tracker_id: Uuid::new_v4(),
            text: "hypothek rechner".into(),
            target_url: None,
            category: None,
            search_volume: None,
            volume_checked_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(kw.effective_target(), DEFAULT_TARGET_DOMAIN);

        kw.target_url = Some("  ".into());
        assert_eq!(kw.effective_target(), DEFAULT_TARGET_DOMAIN);

        kw.target_url = Some("https://ubs.com/hypotheken".into());
        assert_eq!(kw.effective_target(), "https://ubs.com/hypotheken");
    }
}
