//! Fuzzy match decision logic for catalog search results.
//!
//! A result's score is its title similarity (best of title and original
//! title) multiplied by a year-agreement factor. The best result wins unless
//! a different record scores within the ambiguity margin, in which case no
//! match is reported.

use super::CatalogEntry;
use std::collections::HashSet;

/// Lowercase, `&` to `and`, punctuation to spaces, collapsed whitespace.
pub fn normalize_title(title: &str) -> String {
    let replaced = title.replace('&', " and ");
    let spaced: String = replaced
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c == '\'' {
                '\0'
            } else {
                ' '
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Sørensen–Dice similarity of two titles on character bigrams.
///
/// Identical normalised titles score exactly 1.0.
pub fn title_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let left = bigrams(&a);
    let right = bigrams(&b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let mut pool: Vec<(char, char)> = right.clone();
    let mut shared = 0usize;
    for pair in &left {
        if let Some(pos) = pool.iter().position(|p| p == pair) {
            pool.swap_remove(pos);
            shared += 1;
        }
    }

    (2 * shared) as f32 / (left.len() + right.len()) as f32
}

/// 1.0 when the years agree or either is unknown, 0.9 when one year apart,
/// 0.5 otherwise.
pub fn year_factor(query_year: Option<i32>, entry_year: Option<i32>) -> f32 {
    match (query_year, entry_year) {
        (Some(q), Some(e)) if q == e => 1.0,
        (Some(q), Some(e)) if (q - e).abs() == 1 => 0.9,
        (Some(_), Some(_)) => 0.5,
        _ => 1.0,
    }
}

/// Score of one search result against the query title and year.
pub fn score_entry(title: &str, year: Option<i32>, entry: &CatalogEntry) -> f32 {
    let by_title = title_similarity(title, &entry.title);
    let by_original = entry
        .original_title
        .as_deref()
        .map(|orig| title_similarity(title, orig))
        .unwrap_or(0.0);
    (by_title.max(by_original) * year_factor(year, entry.year)).clamp(0.0, 1.0)
}

/// Best-scoring result and its score, or `None` when the results are empty,
/// all score zero, or the runner-up is within `margin` of the best.
pub fn pick_best<'a>(
    title: &str,
    year: Option<i32>,
    entries: &'a [CatalogEntry],
    margin: f32,
) -> Option<(&'a CatalogEntry, f32)> {
    let mut seen = HashSet::new();
    let mut scored: Vec<(&CatalogEntry, f32)> = entries
        .iter()
        .filter(|e| seen.insert(e.id.as_str()))
        .map(|e| (e, score_entry(title, year, e)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best, best_score) = *scored.first()?;
    if best_score <= 0.0 {
        return None;
    }
    if let Some((_, runner_up)) = scored.get(1) {
        if best_score - runner_up < margin {
            return None;
        }
    }
    Some((best, best_score))
}
