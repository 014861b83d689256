//! Optimal-alignment fuzzy scorer.
//!
//! A needle matches a haystack when its case-folded codepoints form a
//! subsequence of the haystack's. Among all such alignments the scorer picks
//! the one with the highest total, computed row by row over
//! needle position × haystack position:
//!
//! ```text
//! M[i][j] = base + boundary(j) + exact_case(i, j)
//!         + max( M[i-1][j-1] + consecutive,
//!                M[i-1][j'] - gap_penalty(j - j' - 1)  for j' < j - 1 )
//! ```
//!
//! The gap penalty is piecewise constant (small/medium/large tiers), so the
//! `j'` maximum splits into two bounded windows plus a running prefix
//! maximum for the large tier. Each row therefore costs O(m).

use crate::config::ScoreWeights;
use crate::error::Result;
use crate::needle::{fold_case, Needle, NeedleChars};

use super::classify::boundary_bonus;
use super::types::Score;

/// Haystacks are considered up to this many codepoints.
pub const MAX_HAYSTACK_LEN: usize = 1024;

/// Marks cells with no valid alignment. Far enough from `i32::MIN` that
/// adding bonuses or subtracting penalties cannot overflow.
const UNREACHABLE: i32 = i32::MIN / 4;

/// Scores needles against haystacks with a fixed set of weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scorer {
    weights: ScoreWeights,
}

/// Decoded suffix of a haystack with per-position bonuses.
#[derive(Debug, Default)]
struct PreparedHaystack {
    chars: Vec<char>,
    folded: Vec<char>,
    bonus: Vec<i32>,
}

impl PreparedHaystack {
    fn new(weights: &ScoreWeights, haystack: &str, offset: usize) -> Self {
        let mut hay = Self::default();
        hay.fill(weights, haystack, offset);
        hay
    }

    /// Decodes `haystack` from codepoint `offset` on, reusing the buffers.
    /// The codepoint just before `offset` still decides the boundary bonus of
    /// the first position.
    fn fill(&mut self, weights: &ScoreWeights, haystack: &str, offset: usize) {
        self.chars.clear();
        self.folded.clear();
        self.bonus.clear();
        let mut prev = None;
        for (position, c) in haystack.chars().take(MAX_HAYSTACK_LEN).enumerate() {
            if position >= offset {
                self.chars.push(c);
                self.folded.push(fold_case(c));
                self.bonus.push(boundary_bonus(weights, prev, c));
            }
            prev = Some(c);
        }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }
}

/// Buffers reused across many calls to [`Scorer::score_chars_in`].
///
/// A shard scan keeps one for its whole loop instead of allocating per
/// candidate. Buffers never grow past [`MAX_HAYSTACK_LEN`] entries.
#[derive(Debug, Default)]
pub struct ScoreScratch {
    hay: PreparedHaystack,
    prev: Vec<i32>,
    current: Vec<i32>,
}

impl ScoreScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scorer {
    /// Creates a scorer after validating the weights.
    pub fn new(weights: ScoreWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Scores `haystack` against the needle's primary variant.
    pub fn score(&self, needle: &Needle, haystack: &str) -> Score {
        self.score_chars(needle.primary(), haystack, 0)
    }

    /// Scores the part of `haystack` starting at codepoint `offset`.
    pub fn score_with_offset(&self, needle: &Needle, haystack: &str, offset: usize) -> Score {
        self.score_chars(needle.primary(), haystack, offset)
    }

    /// Scores with the whitespace-free needle variant when there is one.
    pub fn score_spaceless(&self, needle: &Needle, haystack: &str) -> Score {
        let chars = needle.spaceless().unwrap_or(needle.primary());
        self.score_chars(chars, haystack, 0)
    }

    /// Scores one needle variant against `haystack[offset..]`.
    pub fn score_chars(&self, needle: &NeedleChars, haystack: &str, offset: usize) -> Score {
        self.score_chars_in(&mut ScoreScratch::new(), needle, haystack, offset)
    }

    /// Like [`score_chars`](Self::score_chars), working in `scratch`.
    pub fn score_chars_in(
        &self,
        scratch: &mut ScoreScratch,
        needle: &NeedleChars,
        haystack: &str,
        offset: usize,
    ) -> Score {
        if needle.is_empty() {
            return Score::ZERO;
        }
        if !has_match_chars(needle, haystack, offset) {
            return Score::NO_MATCH;
        }

        let ScoreScratch { hay, prev, current } = scratch;
        hay.fill(&self.weights, haystack, offset);
        let m = hay.len();
        prev.clear();
        prev.resize(m, UNREACHABLE);
        current.clear();
        current.resize(m, UNREACHABLE);

        self.fill_first_row(needle, hay, &mut prev[..]);
        for i in 1..needle.len() {
            self.fill_row(needle, i, hay, &prev[..], &mut current[..]);
            std::mem::swap(prev, current);
        }

        match prev.iter().copied().max() {
            Some(best) if best > UNREACHABLE => Score::saturating_from(best),
            _ => Score::NO_MATCH,
        }
    }

    /// Returns the optimal score together with the haystack codepoint
    /// positions of the matched needle characters.
    ///
    /// Ties pick the earliest final position and, walking backwards, the
    /// closest predecessor.
    pub fn match_positions(&self, needle: &Needle, haystack: &str) -> Option<(Score, Vec<usize>)> {
        let needle = needle.primary();
        if needle.is_empty() {
            return Some((Score::ZERO, Vec::new()));
        }
        if !has_match_chars(needle, haystack, 0) {
            return None;
        }

        let hay = PreparedHaystack::new(&self.weights, haystack, 0);
        let n = needle.len();
        let m = hay.len();
        let mut rows = vec![UNREACHABLE; n * m];

        let (first, _) = rows.split_at_mut(m);
        self.fill_first_row(needle, &hay, first);
        for i in 1..n {
            let (done, rest) = rows.split_at_mut(i * m);
            let prev = &done[(i - 1) * m..];
            self.fill_row(needle, i, &hay, prev, &mut rest[..m]);
        }

        let last = &rows[(n - 1) * m..];
        let (mut j, best) = last
            .iter()
            .copied()
            .enumerate()
            .fold((0, UNREACHABLE), |acc, (k, value)| {
                if value > acc.1 {
                    (k, value)
                } else {
                    acc
                }
            });
        if best <= UNREACHABLE {
            return None;
        }

        let mut positions = vec![0; n];
        positions[n - 1] = j;
        for i in (1..n).rev() {
            let gain = self.cell_gain(needle, i, &hay, j);
            let target = rows[i * m + j] - gain;
            let prev = &rows[(i - 1) * m..i * m];
            let mut found = None;
            for k in (0..j).rev() {
                let candidate = prev[k];
                if candidate <= UNREACHABLE {
                    continue;
                }
                if candidate + self.transition(j - k - 1) == target {
                    found = Some(k);
                    break;
                }
            }
            j = found?;
            positions[i - 1] = j;
        }

        Some((Score::saturating_from(best), positions))
    }

    /// Score of moving from a match to the next one across `gap` codepoints.
    #[inline]
    fn transition(&self, gap: usize) -> i32 {
        if gap == 0 {
            self.weights.consecutive
        } else {
            -self.weights.gap_penalty(gap)
        }
    }

    /// Points awarded for matching needle position `i` at haystack position `k`.
    #[inline]
    fn cell_gain(&self, needle: &NeedleChars, i: usize, hay: &PreparedHaystack, k: usize) -> i32 {
        let bonus = hay.bonus.get(k).copied().unwrap_or(0);
        let exact = match (needle.chars().get(i), hay.chars.get(k)) {
            (Some(a), Some(b)) if a == b => self.weights.exact_case,
            _ => 0,
        };
        self.weights.base + bonus + exact
    }

    #[inline]
    fn matches_at(needle: &NeedleChars, i: usize, hay: &PreparedHaystack, k: usize) -> bool {
        match (needle.upper().get(i), hay.folded.get(k)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn fill_first_row(&self, needle: &NeedleChars, hay: &PreparedHaystack, out: &mut [i32]) {
        for (k, cell) in out.iter_mut().enumerate() {
            *cell = if Self::matches_at(needle, 0, hay, k) {
                self.cell_gain(needle, 0, hay, k) - self.weights.gap_penalty(k)
            } else {
                UNREACHABLE
            };
        }
    }

    fn fill_row(
        &self,
        needle: &NeedleChars,
        i: usize,
        hay: &PreparedHaystack,
        prev: &[i32],
        out: &mut [i32],
    ) {
        let windowed = self.weights.medium_gap_limit;
        let mut far_best = UNREACHABLE;

        for k in 0..out.len() {
            // Predecessors at least `windowed + 1` codepoints back all pay the
            // large-tier penalty; fold the one leaving the window into the running max.
            if let Some(leaving) = k.checked_sub(windowed + 2).and_then(|p| prev.get(p)) {
                far_best = far_best.max(*leaving);
            }

            if k == 0 || !Self::matches_at(needle, i, hay, k) {
                if let Some(cell) = out.get_mut(k) {
                    *cell = UNREACHABLE;
                }
                continue;
            }

            let mut best = UNREACHABLE;
            for gap in 0..=windowed {
                let Some(p) = k.checked_sub(gap + 1) else {
                    break;
                };
                let candidate = prev.get(p).copied().unwrap_or(UNREACHABLE);
                if candidate > UNREACHABLE {
                    best = best.max(candidate + self.transition(gap));
                }
            }
            if far_best > UNREACHABLE {
                best = best.max(far_best - self.weights.gap_large);
            }

            if let Some(cell) = out.get_mut(k) {
                *cell = if best > UNREACHABLE {
                    best + self.cell_gain(needle, i, hay, k)
                } else {
                    UNREACHABLE
                };
            }
        }
    }
}

/// Subsequence test of one needle variant against `haystack[offset..]`.
/// Does not allocate.
fn has_match_chars(needle: &NeedleChars, haystack: &str, offset: usize) -> bool {
    let mut wanted = needle.upper().iter().peekable();
    for c in haystack.chars().take(MAX_HAYSTACK_LEN).skip(offset) {
        let Some(&&next) = wanted.peek() else {
            break;
        };
        if fold_case(c) == next {
            wanted.next();
        }
    }
    wanted.peek().is_none()
}

/// Returns whether every needle character appears, in order, in `haystack`.
pub fn has_match(needle: &Needle, haystack: &str) -> bool {
    has_match_chars(needle.primary(), haystack, 0)
}

/// Like [`has_match`] but only considers `haystack` from codepoint `offset`.
pub fn has_match_with_offset(needle: &Needle, haystack: &str, offset: usize) -> bool {
    has_match_chars(needle.primary(), haystack, offset)
}

/// Scores with the default weights.
pub fn score(needle: &Needle, haystack: &str) -> Score {
    Scorer::default().score(needle, haystack)
}

/// Scores `haystack[offset..]` with the default weights.
pub fn score_with_offset(needle: &Needle, haystack: &str, offset: usize) -> Score {
    Scorer::default().score_with_offset(needle, haystack, offset)
}

/// Scores raw bytes; malformed UTF-8 becomes U+FFFD.
pub fn score_bytes(needle: &Needle, haystack: &[u8]) -> Score {
    Scorer::default().score(needle, &String::from_utf8_lossy(haystack))
}

/// Scores with the spaceless needle variant and the default weights.
pub fn score_spaceless(needle: &Needle, haystack: &str) -> Score {
    Scorer::default().score_spaceless(needle, haystack)
}

/// Optimal alignment positions with the default weights.
pub fn match_positions(needle: &Needle, haystack: &str) -> Option<(Score, Vec<usize>)> {
    Scorer::default().match_positions(needle, haystack)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn needle(query: &str) -> Needle {
        Needle::prepare(query)
    }

    /// Exhaustive reference: tries every alignment.
    fn brute_force(scorer: &Scorer, query: &str, haystack: &str) -> Option<i32> {
        let needle = needle(query);
        let chars = needle.primary();
        let hay = PreparedHaystack::new(scorer.weights(), haystack, 0);

        fn walk(
            scorer: &Scorer,
            needle: &NeedleChars,
            hay: &PreparedHaystack,
            i: usize,
            last: Option<usize>,
            total: i32,
            best: &mut Option<i32>,
        ) {
            if i == needle.len() {
                *best = Some(best.map_or(total, |b| b.max(total)));
                return;
            }
            let start = last.map_or(0, |l| l + 1);
            for k in start..hay.len() {
                if !Scorer::matches_at(needle, i, hay, k) {
                    continue;
                }
                let step = match last {
                    None => -scorer.weights.gap_penalty(k),
                    Some(l) => scorer.transition(k - l - 1),
                };
                let gain = scorer.cell_gain(needle, i, hay, k);
                walk(scorer, needle, hay, i + 1, Some(k), total + step + gain, best);
            }
        }

        let mut best = None;
        walk(scorer, chars, &hay, 0, None, 0, &mut best);
        best
    }

    #[test]
    fn fob_matches_foobar() {
        let result = score(&needle("fob"), "foobar");
        assert!(result.is_match());
        assert!(result > Score::ZERO);
    }

    #[test]
    fn xyz_does_not_match_foobar() {
        assert_eq!(score(&needle("xyz"), "foobar"), Score::NO_MATCH);
        assert!(!has_match(&needle("xyz"), "foobar"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(score(&needle("FOB"), "foobar").is_match());
        assert!(score(&needle("fob"), "FOOBAR").is_match());
    }

    #[test]
    fn exact_case_breaks_ties() {
        let lower = score(&needle("readme"), "readme");
        let upper = score(&needle("readme"), "README");
        assert!(lower > upper);
    }

    #[test]
    fn empty_needle_matches_everything_with_zero() {
        assert_eq!(score(&needle(""), "anything"), Score::ZERO);
        assert_eq!(score(&needle(""), ""), Score::ZERO);
        assert!(has_match(&needle(""), ""));
    }

    #[test]
    fn empty_haystack_does_not_match() {
        assert_eq!(score(&needle("a"), ""), Score::NO_MATCH);
    }

    #[test]
    fn prefix_beats_scattered_on_equal_length() {
        let n = needle("abc");
        let prefix = score(&n, "abcxyz");
        let scattered = score(&n, "axbycz");
        assert!(prefix > scattered, "{prefix} <= {scattered}");
    }

    #[test]
    fn contiguous_beats_scattered_on_equal_length() {
        let n = needle("doc");
        let contiguous = score(&n, "xxxxdocxxxx");
        let scattered = score(&n, "xdxxoxxxcxx");
        assert!(contiguous > scattered, "{contiguous} <= {scattered}");
    }

    #[test]
    fn boundary_matches_beat_mid_word_matches() {
        let n = needle("fb");
        let boundary = score(&n, "foo_bar");
        let mid_word = score(&n, "foozbar");
        assert!(boundary > mid_word);

        let camel = score(&n, "fooBar");
        assert!(camel > mid_word);
    }

    #[test]
    fn gap_penalty_grows_in_tiers() {
        let n = needle("ab");
        let near = score(&n, "axb");
        let medium = score(&n, "axxxxxb");
        let far = score(&n, "axxxxxxxxxxxxxxxxxb");
        assert!(near > medium);
        assert!(medium > far);
    }

    #[test]
    fn picks_the_best_alignment_not_the_first() {
        // Greedy would take the first 'b' right after 'a' (mid-word); the
        // optimal alignment uses the boundary 'b' and then the consecutive 'c'.
        let scorer = Scorer::default();
        let haystack = "abxx_bc";
        let dp = scorer.score(&needle("abc"), haystack);
        let reference = brute_force(&scorer, "abc", haystack).expect("matches");
        assert_eq!(i32::from(dp.get()), reference);
    }

    #[test]
    fn dp_agrees_with_brute_force() {
        let scorer = Scorer::default();
        let cases = [
            ("fob", "foobar"),
            ("fb", "foo/bar/baz"),
            ("abc", "a_b_c_abc"),
            ("ace", "abcdeabcde"),
            ("src", "crates/ranking/src/score.rs"),
            ("ab", "a----------------------b"),
            ("aaa", "aaaaaaaa"),
            ("mdl", "myDocumentList"),
        ];
        for (query, haystack) in cases {
            let dp = scorer.score(&needle(query), haystack);
            let reference = brute_force(&scorer, query, haystack).expect("case should match");
            assert_eq!(i32::from(dp.get()), reference, "{query} vs {haystack}");
        }
    }

    #[test]
    fn score_is_deterministic() {
        let n = needle("rnk");
        let first = score(&n, "crates/ranking/src/lib.rs");
        for _ in 0..10 {
            assert_eq!(score(&n, "crates/ranking/src/lib.rs"), first);
        }
    }

    #[test]
    fn offset_skips_prefix_but_keeps_boundary_context() {
        let n = needle("doc");
        let haystack = "/home/me/docs";
        let offset = "/home/me/".chars().count();

        let full = score(&n, haystack);
        let suffix = score_with_offset(&n, haystack, offset);
        assert!(suffix.is_match());
        // 'd' follows '/', which lies before the offset but still counts.
        let detached = score(&n, "docs");
        assert!(suffix < detached, "start bonus only applies at codepoint 0");
        assert!(suffix > score_with_offset(&n, "/home/meXdocs", offset));
        assert!(full.is_match());
    }

    #[test]
    fn offset_excludes_prefix_characters() {
        let n = needle("home");
        assert!(!score_with_offset(&n, "/home/me/x", 6).is_match());
        assert_eq!(score_with_offset(&n, "home", 100), Score::NO_MATCH);
        assert_eq!(score_with_offset(&needle(""), "home", 100), Score::ZERO);
    }

    #[test]
    fn spaceless_variant_matches_joined_words() {
        let n = needle("my doc");
        assert_eq!(score(&n, "my_document"), Score::NO_MATCH);
        assert!(score_spaceless(&n, "my_document").is_match());
    }

    #[test]
    fn malformed_bytes_do_not_panic() {
        let n = needle("ab");
        assert!(score_bytes(&n, &[b'a', 0xc3, b'b']).is_match());
        assert_eq!(score_bytes(&n, &[0xff, 0xfe]), Score::NO_MATCH);
    }

    #[test]
    fn over_length_haystack_is_truncated() {
        let mut haystack = "x".repeat(MAX_HAYSTACK_LEN);
        haystack.push_str("needle");
        assert_eq!(score(&needle("needle"), &haystack), Score::NO_MATCH);
    }

    #[test]
    fn long_needles_clamp_into_range() {
        let text = "a".repeat(MAX_HAYSTACK_LEN);
        let query = "a".repeat(512);
        let result = score(&needle(&query), &text);
        assert_eq!(result, Score::MAX);
    }

    #[test]
    fn positions_follow_the_optimal_alignment() {
        let (result, positions) =
            match_positions(&needle("fb"), "foo/bar").expect("should match");
        assert_eq!(positions, vec![0, 4]);
        assert_eq!(result, score(&needle("fb"), "foo/bar"));

        assert!(match_positions(&needle("zz"), "foo").is_none());
        assert_eq!(
            match_positions(&needle(""), "foo"),
            Some((Score::ZERO, Vec::new()))
        );
    }

    #[test]
    fn largest_allowed_weights_stay_in_range() {
        use crate::config::MAX_WEIGHT;
        use crate::needle::MAX_NEEDLE_LEN;

        let scorer = Scorer::new(ScoreWeights {
            base: MAX_WEIGHT,
            consecutive: MAX_WEIGHT,
            path_boundary: MAX_WEIGHT,
            word_boundary: MAX_WEIGHT,
            camel_boundary: MAX_WEIGHT,
            start: MAX_WEIGHT,
            exact_case: MAX_WEIGHT,
            gap_small: MAX_WEIGHT,
            gap_medium: MAX_WEIGHT,
            gap_large: MAX_WEIGHT,
            ..ScoreWeights::default()
        })
        .expect("largest weights are valid");

        let run = "a".repeat(MAX_NEEDLE_LEN);
        let contiguous = scorer.score(&needle(&run), &"a".repeat(MAX_HAYSTACK_LEN));
        assert_eq!(contiguous, Score::MAX);

        let scattered: String = "ax".repeat(MAX_HAYSTACK_LEN / 2);
        let score = scorer.score(&needle(&run), &scattered);
        assert!(score.is_match());
        assert!(score >= Score::MIN && score <= Score::MAX);

        let (_, positions) = scorer.match_positions(&needle("ab"), "a/x_b").expect("match");
        assert_eq!(positions, vec![0, 4]);
    }

    #[test]
    fn scratch_reuse_gives_identical_scores() {
        let scorer = Scorer::default();
        let mut scratch = ScoreScratch::new();
        let query = needle("doc");
        for haystack in ["/home/me/documents", "d-o-c", "doc", "/usr/lib/x", "Docker"] {
            assert_eq!(
                scorer.score_chars_in(&mut scratch, query.primary(), haystack, 0),
                scorer.score(&query, haystack),
                "haystack {haystack}"
            );
        }
    }

    #[test]
    fn custom_weights_are_validated() {
        let weights = ScoreWeights {
            gap_large: 1,
            ..ScoreWeights::default()
        };
        assert!(Scorer::new(weights).is_err());
        assert!(Scorer::new(ScoreWeights::default()).is_ok());
    }
}
