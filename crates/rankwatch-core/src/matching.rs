//! Pure position extraction over provider result sets.

use serde::{Deserialize, Serialize};

use crate::{KeywordResults, SerpItem};

/// Outcome of matching one keyword's result set against a target.
///
/// Both fields are `None` when the target does not rank within the
/// provider's search depth — a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RankedMatch {
    pub position: Option<u32>,
    pub url: Option<String>,
}

/// Select the best-ranked organic, non-paid item matching `target` from the
/// result set whose `keyword` equals the query keyword.
///
/// Keyword comparison is exact (no normalization beyond what the provider
/// returns). The minimum `rank_absolute` among eligible items wins, so the
/// result does not depend on provider response ordering.
pub fn find_ranking_position(
    results: &[KeywordResults],
    keyword: &str,
    target: &str,
) -> RankedMatch {
    let Some(result) = results.iter().find(|r| r.keyword == keyword) else {
        return RankedMatch::default();
    };

    let best = result
        .items
        .iter()
        .filter(|item| is_eligible(item) && item_matches_target(item, target))
        .min_by_key(|item| item.rank_absolute);

    match best {
        Some(item) => RankedMatch {
            position: Some(item.rank_absolute),
            url: item.url.clone(),
        },
        None => RankedMatch::default(),
    }
}

fn is_eligible(item: &SerpItem) -> bool {
    item.item_type == "organic" && !item.is_paid
}

fn item_matches_target(item: &SerpItem, target: &str) -> bool {
    target_matches(item.url.as_deref(), item.domain.as_deref(), target)
}

/// Whether a SERP item (by URL and/or domain) matches a user-entered target.
///
/// Targets may be entered as a bare domain (`"ubs.com"`), with scheme and
/// `www.` (`"https://www.ubs.com/"`), or with a path
/// (`"ubs.com/hypotheken"`). Scheme, `www.` prefix and trailing slashes are
/// ignored on both sides; a target path requires the item URL path to start
/// with it.
pub fn target_matches(item_url: Option<&str>, item_domain: Option<&str>, target: &str) -> bool {
    let target = normalize(target);
    if target.is_empty() {
        return false;
    }
    let (target_host, target_path) = split_host_path(&target);

    if let Some(domain) = item_domain {
        let domain = normalize(domain);
        if !domain.is_empty() && domain == target_host {
            if target_path.is_empty() {
                return true;
            }
            // Domain alone cannot satisfy a path-qualified target; fall
            // through to the URL check.
        }
    }

    if let Some(url) = item_url {
        let url = normalize(url);
        let (host, path) = split_host_path(&url);
        if host == target_host && path_starts_with(path, target_path) {
            return true;
        }
    }

    false
}

/// Strip scheme, a leading `www.`, and trailing slashes; lowercase the rest.
fn normalize(input: &str) -> String {
    let s = input.trim().to_ascii_lowercase();
    let s = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(&s);
    let s = s.strip_prefix("www.").unwrap_or(s);
    s.trim_end_matches('/').to_string()
}

fn split_host_path(normalized: &str) -> (&str, &str) {
    match normalized.split_once('/') {
        Some((host, path)) => (host, path),
        None => (normalized, ""),
    }
}

fn path_starts_with(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
