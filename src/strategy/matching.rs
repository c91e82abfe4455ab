//! Player-name matching between the exchange and the model feed.
//!
//! Uses the Ratcliff/Obershelp similarity ratio `2·M / T`, where `M` is the
//! number of characters in the recursively found longest matching blocks
//! and `T` is the combined length of both strings.

/// Default similarity cutoff for a match.
pub const DEFAULT_CUTOFF: f64 = 0.6;

/// Similarity ratio of two strings in 0.0–1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Characters covered by the matching blocks of `a` and `b`.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut stack = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            stack.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            stack.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common block within `a[alo..ahi]` and `b[blo..bhi]`.
/// Ties resolve to the block starting earliest in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // run[j] = length of the common run ending at a[i-1], b[j-1]
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            cur[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            let size = cur[k];
            if size > best_size {
                best_size = size;
                best_i = i + 1 - size;
                best_j = j + 1 - size;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        cur.iter_mut().for_each(|v| *v = 0);
    }

    (best_i, best_j, best_size)
}

/// Best candidate whose similarity to `name` reaches `cutoff`.
///
/// An exact match always wins. Among equal scores the lexically greater
/// candidate is returned, so the result does not depend on iteration order.
pub fn closest_match<'a, I>(name: &str, candidates: I, cutoff: f64) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut best: Option<(f64, &'a str)> = None;

    for candidate in candidates {
        if candidate == name {
            return Some(candidate.as_str());
        }
        let score = similarity(name, candidate);
        if score < cutoff {
            continue;
        }
        let better = match best {
            None => true,
            Some((s, c)) => score > s || (score == s && candidate.as_str() > c),
        };
        if better {
            best = Some((score, candidate.as_str()));
        }
    }

    best.map(|(_, c)| c)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("Rory McIlroy", "Rory McIlroy"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_similarity_known_values() {
        // "abcd" vs "bcde": one block "bcd" → 2·3 / 8
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-12);
        // Two blocks "ab" and "d" in "abxd" vs "abyd" → 2·3 / 8
        assert!((similarity("abxd", "abyd") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_golfer_names() {
        assert!((similarity("Scottie Scheffler", "Scotty Scheffler") - 30.0 / 33.0).abs() < 1e-12);
        assert!((similarity("Rory McIlroy", "Rory Mcilroy") - 22.0 / 24.0).abs() < 1e-12);
        assert!((similarity("Tom Kim", "Tim Kim") - 12.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_closest_match_handles_accents_and_suffixes() {
        let names: Vec<String> = vec![
            "Ludvig Aberg".into(),
            "Scottie Scheffler".into(),
            "Xander Schauffele".into(),
        ];
        assert_eq!(
            closest_match("Ludvig Åberg", &names, DEFAULT_CUTOFF),
            Some("Ludvig Aberg")
        );
        assert_eq!(
            closest_match("Scottie Scheffler Jr.", &names, DEFAULT_CUTOFF),
            Some("Scottie Scheffler")
        );
    }

    #[test]
    fn test_closest_match_below_cutoff() {
        let names: Vec<String> = vec!["Scottie Scheffler".into()];
        assert_eq!(closest_match("Tiger Woods", &names, DEFAULT_CUTOFF), None);
    }

    #[test]
    fn test_exact_match_preferred() {
        let names: Vec<String> = vec!["Tom Kim".into(), "Tom Kin".into()];
        assert_eq!(closest_match("Tom Kim", &names, DEFAULT_CUTOFF), Some("Tom Kim"));
    }
}
