//! Fuzzy subsequence scoring.
//!
//! This module provides:
//! - The bounded fixed-point [`Score`] type and its `NO_MATCH` sentinel
//! - Character classification used for boundary bonuses
//! - The optimal-alignment [`Scorer`]

mod classify;
mod scorer;
mod types;

pub use classify::CharClass;
pub use scorer::{
    has_match, has_match_with_offset, match_positions, score, score_bytes, score_spaceless,
    score_with_offset, ScoreScratch, Scorer, MAX_HAYSTACK_LEN,
};
pub use types::Score;
