//! Fragment deduplication after fan-out merge.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::Fragment;

#[derive(Debug, Clone, PartialEq)]
pub struct DedupSettings {
    /// Characters of content compared by the near-duplicate pass
    pub prefix_chars: usize,
    /// Fragments whose prefixes match above this ratio are collapsed
    pub near_duplicate_ratio: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            prefix_chars: 100,
            near_duplicate_ratio: 0.8,
        }
    }
}

/// Order by raw score descending, then id ascending so equal scores sort stably.
pub fn by_raw_score_desc(a: &Fragment, b: &Fragment) -> Ordering {
    b.raw_score
        .total_cmp(&a.raw_score)
        .then_with(|| a.id.cmp(&b.id))
}

/// Fraction of positions at which two strings carry the same character,
/// relative to the longer string.
pub fn char_position_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let matching = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matching as f64 / longest as f64
}

fn prefix(content: &str, chars: usize) -> String {
    content.trim().chars().take(chars).collect()
}

/// Collapse fan-out candidates: exact id duplicates first (highest score wins),
/// then fragments whose leading content is a near-duplicate of a better one.
///
/// The output is sorted by raw score descending and applying this twice gives
/// the same result as applying it once.
pub fn dedupe_candidates(mut fragments: Vec<Fragment>, settings: &DedupSettings) -> Vec<Fragment> {
    fragments.sort_by(by_raw_score_desc);

    let mut seen_ids = HashSet::new();
    fragments.retain(|f| seen_ids.insert(f.id.clone()));

    let mut kept: Vec<Fragment> = Vec::with_capacity(fragments.len());
    let mut kept_prefixes: Vec<String> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let head = prefix(&fragment.content, settings.prefix_chars);
        let duplicate = kept_prefixes
            .iter()
            .any(|other| char_position_similarity(other, &head) > settings.near_duplicate_ratio);
        if !duplicate {
            kept_prefixes.push(head);
            kept.push(fragment);
        }
    }
    kept
}

/// Drop fragments whose trimmed content exactly repeats an earlier one.
pub fn dedupe_exact_content(fragments: Vec<Fragment>) -> Vec<Fragment> {
    let mut seen = HashSet::new();
    fragments
        .into_iter()
        .filter(|f| seen.insert(f.content.trim().to_string()))
        .collect()
}
