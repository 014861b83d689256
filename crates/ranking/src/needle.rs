//! Prepared query representation.
//!
//! A [`Needle`] is built once per keystroke and then scored against every
//! candidate of every producer, so all per-query work (codepoint decoding,
//! case folding, the whitespace-free variant) happens here.

use std::borrow::Cow;

/// Maximum number of codepoints kept from a query. Longer input is truncated.
pub const MAX_NEEDLE_LEN: usize = 512;

/// Codepoints of one needle variant plus their uppercase shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedleChars {
    chars: Vec<char>,
    upper: Vec<char>,
}

impl NeedleChars {
    fn from_chars(chars: Vec<char>) -> Self {
        let upper = chars.iter().copied().map(fold_case).collect();
        Self { chars, upper }
    }

    /// Codepoints as typed.
    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Case-folded shadow, same length as [`chars`](Self::chars).
    pub fn upper(&self) -> &[char] {
        &self.upper
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// A prepared, reusable query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    query: String,
    primary: NeedleChars,
    spaceless: Option<NeedleChars>,
    truncated: bool,
}

impl Needle {
    /// Prepares `query` for scoring. Never fails; the empty query matches
    /// everything with a score of zero.
    pub fn prepare(query: &str) -> Self {
        let mut chars: Vec<char> = query.chars().take(MAX_NEEDLE_LEN + 1).collect();
        let truncated = chars.len() > MAX_NEEDLE_LEN;
        chars.truncate(MAX_NEEDLE_LEN);

        let spaceless = if chars.iter().any(|c| c.is_whitespace()) {
            let stripped: Vec<char> = chars.iter().copied().filter(|c| !c.is_whitespace()).collect();
            (!stripped.is_empty()).then(|| NeedleChars::from_chars(stripped))
        } else {
            None
        };

        Self {
            query: chars.iter().collect(),
            primary: NeedleChars::from_chars(chars),
            spaceless,
            truncated,
        }
    }

    /// Prepares a query from raw bytes. Malformed UTF-8 is replaced with
    /// U+FFFD before preparation.
    pub fn prepare_bytes(query: &[u8]) -> Self {
        let decoded: Cow<'_, str> = String::from_utf8_lossy(query);
        Self::prepare(&decoded)
    }

    /// The (possibly truncated) query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn primary(&self) -> &NeedleChars {
        &self.primary
    }

    /// Whitespace-stripped variant; present only when the query contained
    /// whitespace around other characters.
    pub fn spaceless(&self) -> Option<&NeedleChars> {
        self.spaceless.as_ref()
    }

    /// Number of codepoints in the primary variant.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Whether the input exceeded [`MAX_NEEDLE_LEN`] codepoints.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

/// Prepares a needle; see [`Needle::prepare`].
pub fn prepare_needle(query: &str) -> Needle {
    Needle::prepare(query)
}

/// Releases a needle. Dropping it has the same effect.
pub fn release_needle(needle: Needle) {
    drop(needle);
}

/// Case-folds one codepoint for comparison.
///
/// Multi-codepoint uppercase mappings (e.g. `ß` → `SS`) keep the original
/// codepoint so that needle and haystack positions stay aligned.
#[inline]
pub fn fold_case(c: char) -> char {
    if c.is_ascii() {
        return c.to_ascii_uppercase();
    }
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}
