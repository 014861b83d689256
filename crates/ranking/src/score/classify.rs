//! Character classes for boundary detection.

use bitflags::bitflags;

use crate::config::ScoreWeights;

bitflags! {
    /// Coarse class of a haystack codepoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharClass: u8 {
        const LOWER = 1;
        const UPPER = 1 << 1;
        const DIGIT = 1 << 2;
        const PATH_SEPARATOR = 1 << 3;
        const WORD_SEPARATOR = 1 << 4;

        const LETTER = Self::LOWER.bits() | Self::UPPER.bits();
    }
}

impl CharClass {
    pub fn of(c: char) -> Self {
        match c {
            '/' | '\\' => Self::PATH_SEPARATOR,
            ' ' | '_' | '-' | '.' | ':' => Self::WORD_SEPARATOR,
            c if c.is_whitespace() => Self::WORD_SEPARATOR,
            c if c.is_numeric() => Self::DIGIT,
            c if c.is_uppercase() => Self::UPPER,
            c if c.is_lowercase() => Self::LOWER,
            // Uncased letters (CJK etc.) behave like lowercase.
            c if c.is_alphabetic() => Self::LOWER,
            _ => Self::empty(),
        }
    }
}

/// Bonus for a match at a position whose preceding codepoint is `prev`.
/// `prev == None` means the match sits on the first haystack codepoint.
#[inline]
pub(super) fn boundary_bonus(weights: &ScoreWeights, prev: Option<char>, current: char) -> i32 {
    let Some(prev) = prev else {
        return weights.start;
    };
    let prev_class = CharClass::of(prev);
    if prev_class.contains(CharClass::PATH_SEPARATOR) {
        return weights.path_boundary;
    }
    if prev_class.contains(CharClass::WORD_SEPARATOR) {
        return weights.word_boundary;
    }
    let current_class = CharClass::of(current);
    let camel = prev_class.contains(CharClass::LOWER) && current_class.contains(CharClass::UPPER);
    let digit = prev_class.intersects(CharClass::LETTER) && current_class.contains(CharClass::DIGIT);
    if camel || digit {
        weights.camel_boundary
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ascii() {
        assert_eq!(CharClass::of('a'), CharClass::LOWER);
        assert_eq!(CharClass::of('Q'), CharClass::UPPER);
        assert_eq!(CharClass::of('4'), CharClass::DIGIT);
        assert_eq!(CharClass::of('/'), CharClass::PATH_SEPARATOR);
        assert_eq!(CharClass::of('_'), CharClass::WORD_SEPARATOR);
        assert_eq!(CharClass::of('#'), CharClass::empty());
    }

    #[test]
    fn boundary_bonus_ranks_separators() {
        let weights = ScoreWeights::default();
        assert_eq!(boundary_bonus(&weights, None, 'a'), weights.start);
        assert_eq!(boundary_bonus(&weights, Some('/'), 'a'), weights.path_boundary);
        assert_eq!(boundary_bonus(&weights, Some('-'), 'a'), weights.word_boundary);
        assert_eq!(boundary_bonus(&weights, Some('o'), 'B'), weights.camel_boundary);
        assert_eq!(boundary_bonus(&weights, Some('v'), '2'), weights.camel_boundary);
        assert_eq!(boundary_bonus(&weights, Some('o'), 'b'), 0);
        assert_eq!(boundary_bonus(&weights, Some('B'), 'C'), 0);
    }
}
