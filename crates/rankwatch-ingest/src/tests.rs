use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use rankwatch_core::{KeywordResults, SearchVolume, SerpItem};
use rankwatch_provider::{ProviderError, RankProvider, RankRequest};
use rankwatch_storage::MemoryStore;
use tokio::sync::Mutex;

use super::*;

/// Canned provider: serves per-keyword item lists, fails whole calls for
/// configured locations, and records every requested location.
#[derive(Default)]
struct FakeProvider {
    items_by_keyword: HashMap<String, Vec<SerpItem>>,
    volumes: HashMap<String, i64>,
    failing_locations: HashSet<String>,
    seen_locations: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn ranking(mut self, keyword: &str, rank: u32, domain: &str, url: &str) -> Self {
        self.items_by_keyword
            .entry(keyword.to_string())
            .or_default()
            .push(SerpItem {
                item_type: "organic".into(),
                rank_absolute: rank,
                url: Some(url.into()),
                domain: Some(domain.into()),
                title: None,
                is_paid: false,
            });
        self
    }

    fn volume(mut self, keyword: &str, volume: i64) -> Self {
        self.volumes.insert(keyword.to_string(), volume);
        self
    }

    fn failing_for(mut self, location: &str) -> Self {
        self.failing_locations.insert(location.to_string());
        self
    }
}

#[async_trait]
impl RankProvider for FakeProvider {
    async fn fetch_rankings(
        &self,
        requests: &[RankRequest],
        location: &str,
        _language: &str,
    ) -> Result<Vec<KeywordResults>, ProviderError> {
        if requests.is_empty() {
            return Err(ProviderError::EmptyRequest);
        }
        self.seen_locations.lock().await.push(location.to_string());
        if self.failing_locations.contains(location) {
            return Err(ProviderError::HttpStatus {
                status: 500,
                url: "https://api.example.test/serp".into(),
            });
        }
        Ok(requests
            .iter()
            .map(|r| {
                let items = self
                    .items_by_keyword
                    .get(&r.keyword)
                    .cloned()
                    .unwrap_or_default();
                KeywordResults {
                    keyword: r.keyword.clone(),
                    items_count: items.len() as u32,
                    items,
                }
            })
            .collect())
    }

    async fn fetch_search_volume(
        &self,
        keywords: &[String],
        location: &str,
        _language: &str,
    ) -> Result<Vec<SearchVolume>, ProviderError> {
        if keywords.is_empty() {
            return Err(ProviderError::EmptyRequest);
        }
        if self.failing_locations.contains(location) {
            return Err(ProviderError::HttpStatus {
                status: 500,
                url: "https://api.example.test/volume".into(),
            });
        }
        Ok(keywords
            .iter()
            .map(|k| SearchVolume {
                keyword: k.clone(),
                search_volume: self.volumes.get(k).copied(),
            })
            .collect())
    }
}

fn test_config() -> IngestConfig {
    IngestConfig {
        database_url: String::new(),
        provider_base_url: String::new(),
        provider_login: String::new(),
        provider_password: String::new(),
        force_location: None,
        default_language: "de".into(),
        serp_depth: 100,
        run_budget: Duration::from_secs(60),
        http_timeout_secs: 5,
        scheduler_enabled: false,
        rankings_cron: String::new(),
        volume_cron: String::new(),
    }
}

#[tokio::test]
async fn run_with_no_trackers_is_an_empty_success() {
    let store = MemoryStore::new();
    let provider = FakeProvider::default();

    let summary = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 0);
    assert_eq!(summary.total_keywords, 0);
    assert_eq!(summary.rankings_recorded, 0);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn ranking_keyword_gets_an_observation() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    let keyword = store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default()
        .ranking("hypothek rechner", 1, "moneypark.ch", "https://moneypark.ch/r")
        .ranking("hypothek rechner", 2, "ubs.com", "https://ubs.com/hypotheken");

    let summary = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 1);
    assert_eq!(summary.total_keywords, 1);
    assert_eq!(summary.rankings_recorded, 1);
    assert!(summary.errors.is_empty());

    let latest = store.latest_observation(keyword.id).await.unwrap().unwrap();
    assert_eq!(latest.position, Some(2));
    assert_eq!(latest.matched_url.as_deref(), Some("https://ubs.com/hypotheken"));
    assert_eq!(latest.run_id, summary.run_id);
}

#[tokio::test]
async fn non_ranking_keyword_writes_nothing_and_keeps_prior_latest() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    let keyword = store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();

    // First run ranks, second run the target has dropped out of the results.
    let ranking = FakeProvider::default().ranking(
        "hypothek rechner",
        3,
        "ubs.com",
        "https://ubs.com/hypotheken",
    );
    run_rankings_once(&store, &ranking, &test_config())
        .await
        .unwrap();

    let dropped =
        FakeProvider::default().ranking("hypothek rechner", 1, "moneypark.ch", "https://moneypark.ch/r");
    let summary = run_rankings_once(&store, &dropped, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.total_keywords, 1);
    assert_eq!(summary.rankings_recorded, 0);

    let history = store.keyword_history(keyword.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].position, Some(3));
}

#[tokio::test]
async fn observations_never_exceed_keywords_processed() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "saeule 3a", None, None)
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "etf sparplan", None, None)
        .await
        .unwrap();
    // Only one of the three ranks.
    let provider =
        FakeProvider::default().ranking("saeule 3a", 4, "ubs.com", "https://ubs.com/vorsorge");

    let summary = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.total_keywords, 3);
    assert_eq!(summary.rankings_recorded, 1);
    assert!(summary.rankings_recorded <= summary.total_keywords);
}

#[tokio::test]
async fn zero_keyword_tracker_is_skipped_without_error() {
    let store = MemoryStore::new();
    store
        .create_tracker("empty-team", "Switzerland", "de")
        .await
        .unwrap();
    let provider = FakeProvider::default();

    let summary = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 0);
    assert_eq!(summary.total_keywords, 0);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn one_tracker_failure_does_not_stop_the_others() {
    let store = MemoryStore::new();
    let broken = store
        .create_tracker("broken-team", "Atlantis", "de")
        .await
        .unwrap();
    let healthy = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    store
        .add_keyword(broken.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let healthy_kw = store
        .add_keyword(healthy.id, "saeule 3a", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default()
        .ranking("saeule 3a", 4, "ubs.com", "https://ubs.com/vorsorge")
        .failing_for("Atlantis");

    let summary = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 1);
    assert_eq!(summary.rankings_recorded, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("broken-team:"), "{:?}", summary.errors);
    assert!(store.latest_observation(healthy_kw.id).await.unwrap().is_some());
}

#[tokio::test]
async fn same_day_double_run_appends_two_observations() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    let keyword = store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default().ranking(
        "hypothek rechner",
        3,
        "ubs.com",
        "https://ubs.com/hypotheken",
    );

    let first = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();
    let second = run_rankings_once(&store, &provider, &test_config())
        .await
        .unwrap();

    let history = store.keyword_history(keyword.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|o| o.position == Some(3)));
    let run_ids: HashSet<_> = history.iter().map(|o| o.run_id).collect();
    assert_eq!(run_ids.len(), 2);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn forced_location_overrides_tracker_locations() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Germany", "de")
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default();

    let mut config = test_config();
    config.force_location = Some("Switzerland".into());
    run_rankings_once(&store, &provider, &config).await.unwrap();

    let seen = provider.seen_locations.lock().await;
    assert_eq!(seen.as_slice(), ["Switzerland"]);
}

#[tokio::test]
async fn exhausted_budget_skips_remaining_trackers_but_keeps_earlier_writes() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default();

    let mut config = test_config();
    config.run_budget = Duration::ZERO;
    let summary = run_rankings_once(&store, &provider, &config).await.unwrap();

    assert_eq!(summary.trackers_processed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("run budget exceeded"));
    assert!(provider.seen_locations.lock().await.is_empty());
}

#[tokio::test]
async fn manual_refresh_targets_one_keyword_only() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    let keyword = store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    let other = store
        .add_keyword(tracker.id, "saeule 3a", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default()
        .ranking("hypothek rechner", 2, "ubs.com", "https://ubs.com/hypotheken")
        .ranking("saeule 3a", 4, "ubs.com", "https://ubs.com/vorsorge");

    let matched = refresh_keyword(&store, &provider, &test_config(), keyword.id)
        .await
        .unwrap();
    assert_eq!(matched.position, Some(2));
    assert!(store.latest_observation(keyword.id).await.unwrap().is_some());
    assert!(store.latest_observation(other.id).await.unwrap().is_none());
}

#[tokio::test]
async fn manual_refresh_of_unknown_keyword_is_not_found() {
    let store = MemoryStore::new();
    let provider = FakeProvider::default();

    let err = refresh_keyword(&store, &provider, &test_config(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::KeywordNotFound(_)));
}

#[tokio::test]
async fn volume_refresh_updates_cached_volumes_per_tracker() {
    let store = MemoryStore::new();
    let tracker = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    let keyword = store
        .add_keyword(tracker.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    store
        .add_keyword(tracker.id, "saeule 3a", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default()
        .volume("hypothek rechner", 880)
        .volume("saeule 3a", 12100);

    let summary = run_volume_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 1);
    assert_eq!(summary.total_keywords, 2);
    assert_eq!(summary.updated_keywords, 2);
    assert!(summary.errors.is_empty());

    let keyword = store.get_keyword(keyword.id).await.unwrap().unwrap();
    assert_eq!(keyword.search_volume, Some(880));
    assert!(keyword.volume_checked_at.is_some());
}

#[tokio::test]
async fn volume_refresh_isolates_tracker_failures() {
    let store = MemoryStore::new();
    let broken = store
        .create_tracker("broken-team", "Atlantis", "de")
        .await
        .unwrap();
    let healthy = store
        .create_tracker("seo-team", "Switzerland", "de")
        .await
        .unwrap();
    store
        .add_keyword(broken.id, "hypothek rechner", None, None)
        .await
        .unwrap();
    store
        .add_keyword(healthy.id, "saeule 3a", None, None)
        .await
        .unwrap();
    let provider = FakeProvider::default()
        .volume("saeule 3a", 12100)
        .failing_for("Atlantis");

    let summary = run_volume_once(&store, &provider, &test_config())
        .await
        .unwrap();
    assert_eq!(summary.trackers_processed, 1);
    assert_eq!(summary.updated_keywords, 1);
    assert_eq!(summary.errors.len(), 1);
}
