//! Best-effort paragraph identity across re-structuring runs.
//!
//! When a page is structured again (new safe area, forced refresh) the LLM
//! returns a fresh paragraph list. User edits live on the old paragraphs, so
//! each new paragraph is matched to the most similar unmatched old one on the
//! same page and inherits its id and flags.

use std::collections::HashSet;

/// Minimum similarity for two paragraphs to be considered the same.
pub const MATCH_THRESHOLD: f64 = 0.85;

/// Lower-case, whitespace-collapsed form used for comparison.
pub fn normalise(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    let mut grams: Vec<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    grams.sort_unstable();
    grams
}

/// Sørensen–Dice coefficient over character bigrams of the normalised texts,
/// in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalise(a), normalise(b));
    if a == b {
        return 1.0;
    }
    let (ga, gb) = (bigrams(&a), bigrams(&b));
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }

    // Multiset intersection of two sorted lists.
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < ga.len() && j < gb.len() {
        match ga[i].cmp(&gb[j]) {
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    (2 * shared) as f64 / (ga.len() + gb.len()) as f64
}

/// Greedy best-match assignment. Returns, for each new text, the index of the
/// old text it inherits from (if any). Each old text is used at most once;
/// pairs are taken in descending similarity, ties broken by position.
pub fn match_texts(old: &[&str], new: &[&str]) -> Vec<Option<usize>> {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (n, new_text) in new.iter().enumerate() {
        for (o, old_text) in old.iter().enumerate() {
            let score = similarity(old_text, new_text);
            if score >= MATCH_THRESHOLD {
                candidates.push((score, n, o));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut assigned = vec![None; new.len()];
    let mut used_old = HashSet::new();
    for (_, n, o) in candidates {
        if assigned[n].is_none() && !used_old.contains(&o) {
            assigned[n] = Some(o);
            used_old.insert(o);
        }
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_after_normalisation() {
        assert_eq!(similarity("Deep  Learning\n", "deep learning"), 1.0);
    }

    #[test]
    fn small_ocr_drift_still_matches() {
        let a = "Transformers have become the dominant architecture for sequence modelling.";
        let b = "Transformers have become the dominant architecture for sequence modeling.";
        assert!(similarity(a, b) >= MATCH_THRESHOLD);
    }

    #[test]
    fn unrelated_text_does_not_match() {
        assert!(similarity("Introduction", "References") < MATCH_THRESHOLD);
        assert_eq!(similarity("", "anything"), 0.0);
    }

    #[test]
    fn each_old_paragraph_is_claimed_once() {
        let old = ["Results are shown below.", "Conclusion"];
        let new = [
            "Results are shown below.",
            "Results are shown below.",
            "Conclusion",
            "Appendix",
        ];
        let m = match_texts(&old, &new);
        assert_eq!(m, vec![Some(0), None, Some(1), None]);
    }
}
