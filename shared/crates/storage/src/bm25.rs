//! Minimal in-process BM25 scorer (spec.md Non-goal: "full-text retrieval
//! quality beyond BM25" — this is the baseline the Non-goal names, not an
//! upgrade path). No tokenizer crate: whitespace/punctuation split,
//! lower-cased, matching the original's best-effort text resolver.

use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub struct Document<'a> {
    pub id: &'a str,
    pub tokens: Vec<String>,
}

/// Score every document against `query`, returning `(id, score)` pairs
/// sorted by descending score then ascending id (stable tie-break).
pub fn bm25_rank<'a>(query: &str, docs: &[Document<'a>]) -> Vec<(String, f64)> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() || docs.is_empty() {
        return Vec::new();
    }

    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.tokens.len() as f64).sum::<f64>() / n;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for term in &query_tokens {
        let df = docs
            .iter()
            .filter(|d| d.tokens.iter().any(|t| t == term))
            .count();
        doc_freq.insert(term.as_str(), df);
    }

    let mut scored: Vec<(String, f64)> = docs
        .iter()
        .map(|doc| {
            let len = doc.tokens.len() as f64;
            let score: f64 = query_tokens
                .iter()
                .map(|term| {
                    let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f64;
                    if df == 0.0 {
                        return 0.0;
                    }
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let tf = doc.tokens.iter().filter(|t| *t == term).count() as f64;
                    let denom = tf + K1 * (1.0 - B + B * len / avg_len.max(1.0));
                    idf * (tf * (K1 + 1.0)) / denom.max(1e-9)
                })
                .sum();
            (doc.id.to_string(), score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    scored
}

/// Brute-force cosine similarity over dense vectors (spec §4.3 "vector
/// cosine when enabled and vector provided"; §6 `ENABLE_EMBEDDINGS`). No
/// ANN index in-process — `storage::graph` is a fixture-scale fallback,
/// not the ArangoDB HNSW/IVF index the spec names for the real adapter.
/// Returns `(id, score)` sorted by descending score then ascending id.
pub fn cosine_rank<'a>(query_vector: &[f64], docs: &[(&'a str, &'a [f64])]) -> Vec<(String, f64)> {
    fn norm(v: &[f64]) -> f64 {
        v.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
    let qn = norm(query_vector);
    if qn == 0.0 || docs.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(String, f64)> = docs
        .iter()
        .filter(|(_, v)| v.len() == query_vector.len())
        .map(|(id, v)| {
            let dn = norm(v);
            let dot: f64 = query_vector.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            let score = if dn == 0.0 { 0.0 } else { dot / (qn * dn) };
            (id.to_string(), score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_outranks_partial_match() {
        let docs = vec![
            Document {
                id: "a",
                tokens: tokenize("adopt grpc for the payments service"),
            },
            Document {
                id: "b",
                tokens: tokenize("adopt rest for the billing service"),
            },
        ];
        let ranked = bm25_rank("grpc payments", &docs);
        assert_eq!(ranked.first().unwrap().0, "a");
    }

    #[test]
    fn empty_query_returns_no_matches() {
        let docs = vec![Document {
            id: "a",
            tokens: tokenize("anything"),
        }];
        assert!(bm25_rank("", &docs).is_empty());
    }

    #[test]
    fn cosine_rank_prefers_closer_vector() {
        let docs = vec![("a", &[1.0, 0.0][..]), ("b", &[0.0, 1.0][..])];
        let ranked = cosine_rank(&[1.0, 0.1], &docs);
        assert_eq!(ranked.first().unwrap().0, "a");
    }

    #[test]
    fn cosine_rank_ignores_mismatched_dims() {
        let docs = vec![("a", &[1.0, 0.0, 0.0][..])];
        assert!(cosine_rank(&[1.0, 0.0], &docs).is_empty());
    }
}
