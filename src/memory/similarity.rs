//! Similarity primitives shared by clustering, review, and search.
//!
//! Cosine similarity over embeddings when available, MinHash over character
//! shingles as the lexical fallback, and Jaccard over tag sets.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Character-shingle width for MinHash.
const SHINGLE_K: usize = 5;
/// Number of hash permutations in a MinHash signature.
const MINHASH_PERMUTATIONS: usize = 128;

/// Cosine similarity between two vectors. Zero-magnitude or mismatched
/// vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        mag_a += f64::from(*x) * f64::from(*x);
        mag_b += f64::from(*y) * f64::from(*y);
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a.sqrt() * mag_b.sqrt())
}

/// Jaccard similarity of two string sets: |∩| / |∪|, 0 when both are empty.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Normalize content for hashing and duplicate detection: lowercase,
/// collapse whitespace, strip URL query strings.
pub fn normalize_content(content: &str) -> String {
    let lowered = content.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for word in lowered.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(strip_url_query(word));
    }
    out
}

/// Drop the query string from URL-shaped tokens.
fn strip_url_query(token: &str) -> &str {
    if token.starts_with("http://") || token.starts_with("https://") {
        token.split('?').next().unwrap_or(token)
    } else {
        token
    }
}

/// Stable 64-bit hash of normalized content, used for exact-duplicate
/// prefiltering.
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_content(content).hash(&mut hasher);
    hasher.finish()
}

/// MinHash signature over k-character shingles of normalized content.
#[derive(Debug, Clone)]
pub struct MinHashSignature {
    mins: Vec<u64>,
}

impl MinHashSignature {
    /// Build a signature from raw content. Texts shorter than one shingle
    /// produce an empty signature that matches nothing.
    pub fn of(content: &str) -> Self {
        let normalized = normalize_content(content);
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() < SHINGLE_K {
            return Self { mins: Vec::new() };
        }

        let mut mins = vec![u64::MAX; MINHASH_PERMUTATIONS];
        for window in chars.windows(SHINGLE_K) {
            let base = {
                let mut hasher = DefaultHasher::new();
                window.hash(&mut hasher);
                hasher.finish()
            };
            for (perm, min) in mins.iter_mut().enumerate() {
                // Cheap per-permutation mix of the base shingle hash.
                let mixed = base
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15u64.wrapping_add(perm as u64 * 2 + 1))
                    .rotate_left((perm % 63) as u32 + 1);
                if mixed < *min {
                    *min = mixed;
                }
            }
        }
        Self { mins }
    }

    /// Estimate Jaccard similarity of the underlying shingle sets.
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.mins.is_empty() || other.mins.is_empty() {
            return 0.0;
        }
        let matching = self
            .mins
            .iter()
            .zip(other.mins.iter())
            .filter(|(a, b)| a == b)
            .count();
        matching as f64 / MINHASH_PERMUTATIONS as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn jaccard_basics() {
        let a = vec!["security".to_string(), "jwt".to_string()];
        let b = vec!["api".to_string(), "frontend".to_string()];
        let c = vec!["jwt".to_string(), "api".to_string()];
        assert_eq!(jaccard(&a, &b), 0.0);
        assert!((jaccard(&a, &c) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }

    #[test]
    fn normalization_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_content("  Hello\t  WORLD \n again "),
            "hello world again"
        );
        assert_eq!(
            normalize_content("see https://example.com/page?utm=1 now"),
            "see https://example.com/page now"
        );
    }

    #[test]
    fn content_hash_detects_exact_duplicates() {
        assert_eq!(content_hash("Same  Text"), content_hash("same text"));
        assert_ne!(content_hash("same text"), content_hash("other text"));
    }

    #[test]
    fn minhash_scores_near_duplicates_high() {
        let a = MinHashSignature::of(
            "we decided to use postgres for the analytics service backend",
        );
        let b = MinHashSignature::of(
            "we decided to use postgres for the analytics service back-end",
        );
        let c = MinHashSignature::of("completely unrelated sentence about gardening tips");

        assert!(a.similarity(&a) == 1.0);
        assert!(a.similarity(&b) > 0.6, "was {}", a.similarity(&b));
        assert!(a.similarity(&c) < 0.2, "was {}", a.similarity(&c));
    }

    #[test]
    fn minhash_short_text_matches_nothing() {
        let short = MinHashSignature::of("hi");
        let other = MinHashSignature::of("a longer body of text here");
        assert_eq!(short.similarity(&other), 0.0);
    }
}
