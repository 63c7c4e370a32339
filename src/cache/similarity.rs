use std::collections::HashSet;

/// Lowercased alphanumeric word set of a text.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Word-set Jaccard similarity in [0, 1]. Two empty texts are identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// Number of distinct words in `candidate` that do not occur in `original`.
pub fn novel_word_count(original: &str, candidate: &str) -> usize {
    let original = word_set(original);
    word_set(candidate).difference(&original).count()
}

/// Case-insensitive phrase match on word boundaries.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let text = text.to_lowercase();
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return false;
    }
    text.match_indices(&phrase).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_identical_ignores_case_and_punctuation() {
        assert_eq!(
            jaccard_similarity("What is the refund policy?", "what IS the refund policy"),
            1.0
        );
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {refund, policy} / {refund, policy, shipping, cost}
        let sim = jaccard_similarity("refund policy", "refund policy shipping cost");
        assert!((sim - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_jaccard_disjoint() {
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn test_jaccard_empty_inputs() {
        assert_eq!(jaccard_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("", "word"), 0.0);
    }

    #[test]
    fn test_contains_phrase_respects_word_boundaries() {
        assert!(contains_phrase("Compare A vs. B", "vs"));
        assert!(contains_phrase("What IF prices rose", "what if"));
        assert!(!contains_phrase("whenever possible", "when"));
        assert!(!contains_phrase("anything", ""));
    }

    #[test]
    fn test_novel_word_count() {
        assert_eq!(novel_word_count("refund policy", "refund policy details"), 1);
        assert_eq!(novel_word_count("refund policy", "Refund, policy!"), 0);
        assert_eq!(novel_word_count("a", "b c c"), 2);
    }
}
