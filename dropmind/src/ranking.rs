//! Lexicographic ranking for search results.
//!
//! Higher-priority signals always dominate lower ones: a pinned item beats any
//! unpinned one, then more title hits beat fewer, then newer beats older.

use crate::interface::Item;
use std::collections::BTreeSet;

/// Rank tuple: derived Ord gives lexicographic comparison.
/// All components: higher = better.
///
/// Tuple order (most to least important):
/// 1. pinned
/// 2. title_hits: query tokens found as a substring of the title/filename
/// 3. created_at: microseconds since epoch
/// 4. id: final tiebreaker so equal timestamps still order deterministically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankScore {
    pub pinned: bool,
    pub title_hits: u16,
    pub created_at: i64,
    pub id: i64,
}

/// Count query tokens that occur (case-insensitively) inside `title`
pub fn title_hits(title: Option<&str>, query_tokens: &BTreeSet<String>) -> u16 {
    let Some(title) = title else {
        return 0;
    };
    let title_lower = title.to_lowercase();
    query_tokens
        .iter()
        .filter(|token| title_lower.contains(token.as_str()))
        .count()
        .min(u16::MAX as usize) as u16
}

pub fn rank_score(item: &Item, query_tokens: &BTreeSet<String>) -> RankScore {
    RankScore {
        pinned: item.pinned,
        title_hits: title_hits(item.payload.title_text(), query_tokens),
        created_at: item.created_at.timestamp_micros(),
        id: item.id,
    }
}

/// Sort best-first
pub fn rank(items: Vec<Item>, query_tokens: &BTreeSet<String>) -> Vec<Item> {
    let mut scored: Vec<(RankScore, Item)> = items
        .into_iter()
        .map(|item| (rank_score(&item, query_tokens), item))
        .collect();
    scored.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Card, ItemPayload};
    use chrono::{Duration, Utc};

    fn tokens(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn item(id: i64, age_secs: i64, pinned: bool, payload: ItemPayload) -> Item {
        let created_at = Utc::now() - Duration::seconds(age_secs);
        Item {
            id,
            clipboard_id: 1,
            created_at,
            updated_at: created_at,
            pinned,
            search_text: String::new(),
            payload,
        }
    }

    fn note(text: &str) -> ItemPayload {
        ItemPayload::Note { text: text.to_string() }
    }

    fn titled_link(title: &str) -> ItemPayload {
        ItemPayload::Link {
            url: "https://example.com".to_string(),
            card: Some(Card { title: Some(title.to_string()), ..Default::default() }),
        }
    }

    #[test]
    fn test_title_hits_case_insensitive_substring() {
        let q = tokens(&["example", "guide", "missing"]);
        assert_eq!(title_hits(Some("The EXAMPLE Guidebook"), &q), 2);
        assert_eq!(title_hits(None, &q), 0);
    }

    #[test]
    fn test_pinned_beats_title_hits() {
        let q = tokens(&["example"]);
        let pinned_note = item(1, 100, true, note("example body"));
        let titled = item(2, 0, false, titled_link("Example Article"));
        let ranked = rank(vec![titled, pinned_note], &q);
        assert_eq!(ranked.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_title_hits_beat_recency() {
        let q = tokens(&["example"]);
        let older_titled = item(1, 3600, false, titled_link("Example Article"));
        let newer_note = item(2, 0, false, note("example in body only"));
        let ranked = rank(vec![newer_note, older_titled], &q);
        assert_eq!(ranked[0].id, 1);
    }

    #[test]
    fn test_recency_then_id_breaks_ties() {
        let q = tokens(&["word"]);
        let mut a = item(1, 10, false, note("word"));
        let b = item(2, 0, false, note("word"));
        let mut c = item(3, 0, false, note("word"));
        c.created_at = b.created_at;
        a.created_at = b.created_at - Duration::seconds(10);

        let ranked = rank(vec![a, b, c], &q);
        assert_eq!(ranked.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn test_score_ordering_is_lexicographic() {
        let low = RankScore { pinned: false, title_hits: 5, created_at: i64::MAX, id: 9 };
        let high = RankScore { pinned: true, title_hits: 0, created_at: 0, id: 1 };
        assert!(high > low);
    }
}
