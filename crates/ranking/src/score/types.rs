use std::fmt;

/// Signed 16-bit relevancy.
///
/// Valid scores lie in `[Score::MIN, Score::MAX]`, which is symmetric around
/// zero. `i16::MIN` is reserved for [`Score::NO_MATCH`] and therefore orders
/// below every real score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Score(i16);

impl Score {
    /// Sentinel returned when the needle is not a subsequence of the haystack.
    pub const NO_MATCH: Self = Self(i16::MIN);
    pub const MAX: Self = Self(16383);
    pub const MIN: Self = Self(-16383);
    pub const ZERO: Self = Self(0);

    /// Creates a score, clamping into the valid range.
    #[inline]
    pub fn new(value: i16) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// Clamps a wide intermediate total into the valid range.
    #[inline]
    pub fn saturating_from(value: i32) -> Self {
        // Fits in i16 after the clamp.
        Self(value.clamp(i32::from(Self::MIN.0), i32::from(Self::MAX.0)) as i16)
    }

    #[inline]
    pub fn get(self) -> i16 {
        self.0
    }

    #[inline]
    pub fn is_match(self) -> bool {
        self != Self::NO_MATCH
    }
}

impl From<Score> for i16 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("no-match")
        }
    }
}
