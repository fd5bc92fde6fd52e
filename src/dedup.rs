//! Exact and near-duplicate detection
//!
//! Three layers: URL canonicalization (tracking parameters stripped, host
//! case and default ports normalized), SHA-256 fingerprints for exact
//! duplicates, and 128-permutation MinHash sketches over the first 500
//! characters of title+description for near-duplicates (Jaccard >= 0.85).

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::ResultItem;

/// Characters of title+description fed into the MinHash sketch
const SKETCH_CONTENT_CHARS: usize = 500;
/// Number of MinHash permutations
const NUM_PERMUTATIONS: usize = 128;
/// Jaccard similarity at or above which two items are near-duplicates
pub const NEAR_DUP_THRESHOLD: f64 = 0.85;

/// Query parameters that only track the click, never the content
const TRACKING_PARAMS: &[&str] = &[
    "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content",
    "fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "s",
];

// ============================================================================
// URL canonicalization
// ============================================================================

/// Canonicalize a URL for fingerprinting. Idempotent: canonicalizing the
/// output again yields the same string.
pub fn canonicalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return trimmed.to_string();
    };
    let scheme = scheme.to_lowercase();

    // Split off fragment first; it never reaches the server
    let rest = rest.split('#').next().unwrap_or(rest);

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let mut host = authority.to_lowercase();
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() {
        if let Some(stripped) = host.strip_suffix(default_port) {
            host = stripped.to_string();
        }
    }

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let path = if path.is_empty() { "/" } else { path };

    let kept_query: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|pair| {
                    let name = pair.split('=').next().unwrap_or("").to_lowercase();
                    !name.is_empty() && !TRACKING_PARAMS.contains(&name.as_str())
                })
                .collect()
        })
        .unwrap_or_default();

    if kept_query.is_empty() {
        format!("{}://{}{}", scheme, host, path)
    } else {
        format!("{}://{}{}?{}", scheme, host, path, kept_query.join("&"))
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Monitor fingerprint: canonical URL when present, lowercase title|date
/// otherwise
pub fn monitor_fingerprint(item: &ResultItem) -> String {
    if !item.url.trim().is_empty() {
        sha256_hex(&canonicalize_url(&item.url))
    } else {
        sha256_hex(&format!("{}|{}", item.title.to_lowercase(), item.date))
    }
}

/// Evidence fingerprint used for within-task and run-level dedup:
/// title|date|canonical URL
pub fn evidence_fingerprint(item: &ResultItem) -> String {
    sha256_hex(&format!(
        "{}|{}|{}",
        item.title.to_lowercase(),
        item.date,
        canonicalize_url(&item.url)
    ))
}

// ============================================================================
// MinHash near-duplicate detection
// ============================================================================

/// SplitMix64; deterministic permutation constants without carrying a
/// randomness dependency
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn permutation_constants() -> Vec<(u64, u64)> {
    let mut state = 0x0015_5D5A_u64;
    (0..NUM_PERMUTATIONS)
        .map(|_| (splitmix64(&mut state) | 1, splitmix64(&mut state)))
        .collect()
}

fn base_hash(shingle: &str) -> u64 {
    // FNV-1a; stable across platforms and runs
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in shingle.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// 128-permutation MinHash sketch of a short text
#[derive(Debug, Clone)]
pub struct MinHashSketch {
    mins: Vec<u64>,
    empty: bool,
}

impl MinHashSketch {
    /// Sketch the first [`SKETCH_CONTENT_CHARS`] characters of `text`
    /// using word 3-gram shingles
    pub fn of(text: &str) -> Self {
        let prefix: String = text.chars().take(SKETCH_CONTENT_CHARS).collect();
        let words: Vec<&str> = prefix.split_whitespace().collect();
        let shingles: Vec<String> = if words.len() < 3 {
            if words.is_empty() {
                Vec::new()
            } else {
                vec![words.join(" ").to_lowercase()]
            }
        } else {
            words
                .windows(3)
                .map(|w| w.join(" ").to_lowercase())
                .collect()
        };

        if shingles.is_empty() {
            return Self {
                mins: vec![u64::MAX; NUM_PERMUTATIONS],
                empty: true,
            };
        }

        let constants = permutation_constants();
        let hashes: Vec<u64> = shingles.iter().map(|s| base_hash(s)).collect();
        let mins = constants
            .iter()
            .map(|(a, b)| {
                hashes
                    .iter()
                    .map(|h| h.wrapping_mul(*a).wrapping_add(*b))
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect();
        Self { mins, empty: false }
    }

    /// Estimated Jaccard similarity; empty sketches never match anything
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.empty || other.empty {
            return 0.0;
        }
        let matching = self
            .mins
            .iter()
            .zip(other.mins.iter())
            .filter(|(a, b)| a == b)
            .count();
        matching as f64 / NUM_PERMUTATIONS as f64
    }
}

/// A near-duplicate collapsed into an earlier-dated item
#[derive(Debug, Clone, Serialize)]
pub struct NearDuplicate {
    pub dropped_title: String,
    pub dropped_url: String,
    pub kept_title: String,
    pub similarity: f64,
}

/// Outcome of one dedup pass
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Items that survived both exact and near-duplicate filtering
    pub fresh: Vec<ResultItem>,
    /// Count of items dropped against the persistent seen-set
    pub dropped_seen: usize,
    /// Count of exact duplicates within the batch itself
    pub dropped_in_batch: usize,
    /// Near-duplicates collapsed, with similarity scores for the log
    pub near_duplicates: Vec<NearDuplicate>,
    /// Fingerprints of every item processed, retained or not; the caller
    /// persists the union so a once-seen item never re-alerts
    pub processed_fingerprints: Vec<String>,
}

/// Run the full dedup pipeline over a candidate pool.
///
/// Deterministic and idempotent: the same input against the same seen-set
/// yields the same retained set.
pub fn dedupe(items: Vec<ResultItem>, seen: &HashSet<String>) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut batch_fingerprints: HashSet<String> = HashSet::new();
    let mut survivors: Vec<ResultItem> = Vec::new();

    for item in items {
        let fingerprint = monitor_fingerprint(&item);
        outcome.processed_fingerprints.push(fingerprint.clone());
        if seen.contains(&fingerprint) {
            outcome.dropped_seen += 1;
            continue;
        }
        if !batch_fingerprints.insert(fingerprint) {
            outcome.dropped_in_batch += 1;
            continue;
        }
        survivors.push(item);
    }

    // Near-duplicate pass: keep the earliest-dated item of each cluster.
    // Sorting by date first makes "earliest wins" fall out of scan order;
    // undated items sort last so they never displace a dated original.
    let mut order: Vec<usize> = (0..survivors.len()).collect();
    order.sort_by(|&a, &b| {
        let date_a = &survivors[a].date;
        let date_b = &survivors[b].date;
        match (date_a.is_empty(), date_b.is_empty()) {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => date_a.cmp(date_b),
        }
    });

    let sketches: Vec<MinHashSketch> = survivors
        .iter()
        .map(|item| MinHashSketch::of(&format!("{} {}", item.title, item.description)))
        .collect();

    let mut kept_indices: Vec<usize> = Vec::new();
    let mut dropped: HashSet<usize> = HashSet::new();
    for &candidate in &order {
        let mut duplicate_of = None;
        for &kept in &kept_indices {
            let similarity = sketches[candidate].similarity(&sketches[kept]);
            if similarity >= NEAR_DUP_THRESHOLD {
                duplicate_of = Some((kept, similarity));
                break;
            }
        }
        match duplicate_of {
            Some((kept, similarity)) => {
                dropped.insert(candidate);
                outcome.near_duplicates.push(NearDuplicate {
                    dropped_title: survivors[candidate].title.clone(),
                    dropped_url: survivors[candidate].url.clone(),
                    kept_title: survivors[kept].title.clone(),
                    similarity,
                });
            }
            None => kept_indices.push(candidate),
        }
    }

    outcome.fresh = survivors
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, item)| item)
        .collect();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn item(title: &str, url: &str, date: &str, description: &str) -> ResultItem {
        ResultItem {
            title: title.to_string(),
            url: url.to_string(),
            date: date.to_string(),
            description: description.to_string(),
            author: None,
            source_id: "stub".to_string(),
            raw: Value::Null,
        }
    }

    #[test]
    fn test_canonicalize_strips_tracking_and_normalizes() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.COM:443/Path?utm_source=x&id=7#frag"),
            "https://example.com/Path?id=7"
        );
        assert_eq!(
            canonicalize_url("http://example.com:80"),
            "http://example.com/"
        );
        assert_eq!(
            canonicalize_url("https://example.com/a?fbclid=123"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            "HTTPS://Example.COM:443/Path?utm_source=x&id=7#frag",
            "http://example.com",
            "https://example.com/a/b?x=1&y=2",
            "not a url at all",
        ];
        for input in inputs {
            let once = canonicalize_url(input);
            assert_eq!(canonicalize_url(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_fingerprint_prefers_url() {
        let a = item("Title A", "https://example.com/x?utm_source=feed", "2026-01-01", "");
        let b = item("Different Title", "https://EXAMPLE.com/x", "2026-02-02", "");
        assert_eq!(monitor_fingerprint(&a), monitor_fingerprint(&b));

        let c = item("Same", "", "2026-01-01", "");
        let d = item("same", "", "2026-01-01", "");
        assert_eq!(monitor_fingerprint(&c), monitor_fingerprint(&d));
    }

    #[test]
    fn test_evidence_fingerprint_includes_title() {
        let a = item("Title A", "https://example.com/x", "2026-01-01", "");
        let b = item("Title B", "https://example.com/x", "2026-01-01", "");
        assert_ne!(evidence_fingerprint(&a), evidence_fingerprint(&b));
    }

    #[test]
    fn test_minhash_similarity() {
        let text = "Army fields first hypersonic battery after years of delays and testing \
                    setbacks at the proving ground in preparation for the deployment";
        let near = "Army fields first hypersonic battery after years of delays and testing \
                    setbacks at the proving ground ahead of the deployment";
        let far = "School board votes on new lunch menu for the spring semester";

        let s1 = MinHashSketch::of(text);
        let s2 = MinHashSketch::of(near);
        let s3 = MinHashSketch::of(far);
        assert!(s1.similarity(&s2) > 0.6);
        assert!(s1.similarity(&s3) < 0.2);
        assert!((s1.similarity(&s1) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_sketches_never_match() {
        let empty_a = MinHashSketch::of("");
        let empty_b = MinHashSketch::of("   ");
        assert_eq!(empty_a.similarity(&empty_b), 0.0);
    }

    #[test]
    fn test_dedupe_against_seen_set() {
        let seen: HashSet<String> = [monitor_fingerprint(&item(
            "Old", "https://example.com/old", "2026-01-01", "",
        ))]
        .into_iter()
        .collect();

        let outcome = dedupe(
            vec![
                item("Old", "https://example.com/old", "2026-01-01", ""),
                item("New", "https://example.com/new", "2026-01-02", ""),
            ],
            &seen,
        );
        assert_eq!(outcome.fresh.len(), 1);
        assert_eq!(outcome.fresh[0].title, "New");
        assert_eq!(outcome.dropped_seen, 1);
        assert_eq!(outcome.processed_fingerprints.len(), 2);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let seen = HashSet::new();
        let items = vec![
            item("A story", "https://example.com/a", "2026-01-01", "body text here"),
            item("B story", "https://example.com/b", "2026-01-02", "other body"),
            item("A story", "https://example.com/a?utm_source=x", "2026-01-01", "body text here"),
        ];
        let first = dedupe(items.clone(), &seen);
        let second = dedupe(items, &seen);
        let titles = |o: &DedupOutcome| o.fresh.iter().map(|i| i.title.clone()).collect::<Vec<_>>();
        assert_eq!(titles(&first), titles(&second));
        assert_eq!(first.dropped_in_batch, 1);
    }

    #[test]
    fn test_near_duplicate_keeps_earliest() {
        // Same syndicated text on two sites; distinct URLs defeat the exact
        // fingerprint but the sketches match
        let body = "The service stood up its first operational battery following a series of \
                    flight test successes and schedule slips across fiscal years";
        let newer = item("Launcher reaches unit", "https://siteb.com/2", "2026-03-05", body);
        let older = item("Launcher reaches unit", "https://sitea.com/1", "2026-03-01", body);

        let outcome = dedupe(vec![newer, older], &HashSet::new());
        assert_eq!(outcome.fresh.len(), 1);
        assert_eq!(outcome.fresh[0].url, "https://sitea.com/1");
        assert_eq!(outcome.near_duplicates.len(), 1);
        assert!(outcome.near_duplicates[0].similarity >= NEAR_DUP_THRESHOLD);
    }
}
