//! Tunable configuration for scoring, result containers and the path index.
//!
//! Every field has a default, so an embedding application can ship a partial
//! JSON document (or none at all) and only override what it cares about.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::container::MAX_SHEETS;
use crate::error::{RankingError, Result};

/// Largest gap tier boundary the scorer supports; bounds the sliding windows
/// used by the alignment search.
pub const MAX_GAP_TIER_LIMIT: usize = 64;

/// Largest magnitude any single weight may take. With needles capped at 512
/// codepoints this keeps every alignment total far inside `i32`.
pub const MAX_WEIGHT: i32 = 1 << 14;

/// Bonus and penalty magnitudes used by the scorer.
///
/// The shape is fixed (consecutive bonus, boundary bonuses, tiered gap
/// penalty), the magnitudes are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Awarded for every matched needle character.
    pub base: i32,
    /// Awarded when a match directly follows the previous matched character.
    pub consecutive: i32,
    /// Match right after `/` or `\`.
    pub path_boundary: i32,
    /// Match right after a word separator (space, `_`, `-`, `.`, `:`).
    pub word_boundary: i32,
    /// Match on a lower→upper or letter→digit transition.
    pub camel_boundary: i32,
    /// Match on the very first character of the haystack.
    pub start: i32,
    /// Needle and haystack character agree in case.
    pub exact_case: i32,
    /// Penalty for gaps of `1..=small_gap_limit` characters.
    pub gap_small: i32,
    /// Penalty for gaps up to `medium_gap_limit` characters.
    pub gap_medium: i32,
    /// Penalty for any longer gap.
    pub gap_large: i32,
    pub small_gap_limit: usize,
    pub medium_gap_limit: usize,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 16,
            consecutive: 24,
            path_boundary: 40,
            word_boundary: 32,
            camel_boundary: 28,
            start: 48,
            exact_case: 1,
            gap_small: 3,
            gap_medium: 8,
            gap_large: 16,
            small_gap_limit: 3,
            medium_gap_limit: 10,
        }
    }
}

impl ScoreWeights {
    /// Penalty for `gap` skipped characters between two matches.
    #[inline]
    pub fn gap_penalty(&self, gap: usize) -> i32 {
        if gap == 0 {
            0
        } else if gap <= self.small_gap_limit {
            self.gap_small
        } else if gap <= self.medium_gap_limit {
            self.gap_medium
        } else {
            self.gap_large
        }
    }

    /// Rejects weights that break the scoring contract.
    pub fn validate(&self) -> Result<()> {
        let bonuses = [
            self.consecutive,
            self.path_boundary,
            self.word_boundary,
            self.camel_boundary,
            self.start,
            self.exact_case,
        ];
        let magnitudes = [
            ("base", self.base),
            ("consecutive", self.consecutive),
            ("path_boundary", self.path_boundary),
            ("word_boundary", self.word_boundary),
            ("camel_boundary", self.camel_boundary),
            ("start", self.start),
            ("exact_case", self.exact_case),
            ("gap_small", self.gap_small),
            ("gap_medium", self.gap_medium),
            ("gap_large", self.gap_large),
        ];
        if let Some((name, value)) = magnitudes.iter().find(|(_, value)| *value > MAX_WEIGHT) {
            return Err(RankingError::InvalidConfig(format!(
                "scoring.{name} ({value}) exceeds {MAX_WEIGHT}"
            )));
        }
        if self.base <= 0 {
            return Err(RankingError::InvalidConfig(
                "scoring.base must be positive".to_string(),
            ));
        }
        if bonuses.iter().any(|bonus| *bonus < 0) {
            return Err(RankingError::InvalidConfig(
                "scoring bonuses must not be negative".to_string(),
            ));
        }
        if self.gap_small < 0
            || self.gap_medium < self.gap_small
            || self.gap_large < self.gap_medium
        {
            return Err(RankingError::InvalidConfig(format!(
                "gap penalties must be tiered: 0 <= small ({}) <= medium ({}) <= large ({})",
                self.gap_small, self.gap_medium, self.gap_large
            )));
        }
        if self.small_gap_limit == 0
            || self.medium_gap_limit <= self.small_gap_limit
            || self.medium_gap_limit > MAX_GAP_TIER_LIMIT
        {
            return Err(RankingError::InvalidConfig(format!(
                "gap tier limits must satisfy 0 < small ({}) < medium ({}) <= {}",
                self.small_gap_limit, self.medium_gap_limit, MAX_GAP_TIER_LIMIT
            )));
        }
        Ok(())
    }
}

/// Growth bound for a result container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLimits {
    /// Maximum number of sheets one container may allocate.
    pub max_sheets: usize,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            max_sheets: MAX_SHEETS,
        }
    }
}

impl ContainerLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_sheets == 0 || self.max_sheets > usize::from(u16::MAX) {
            return Err(RankingError::InvalidConfig(format!(
                "container.max_sheets must be in 1..={}, got {}",
                u16::MAX,
                self.max_sheets
            )));
        }
        Ok(())
    }
}

/// Path index construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of independently locked shards.
    pub shard_count: usize,
    /// Prefix shared by most indexed paths (usually the home directory).
    pub common_prefix: Option<String>,
    /// Entries must score strictly above this to reach a container.
    pub min_relevancy: i16,
    /// Initial arena size per shard, in bytes.
    pub initial_arena_bytes: usize,
    /// Initial hash index slots per shard (rounded up to a power of two).
    pub initial_slots: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shard_count: 8,
            common_prefix: None,
            min_relevancy: 0,
            initial_arena_bytes: 64 * 1024,
            initial_slots: 1024,
        }
    }
}

impl IndexConfig {
    /// Convenience constructor mirroring `index_init(shard_count, prefix)`.
    pub fn new(shard_count: usize, common_prefix: Option<&str>) -> Self {
        Self {
            shard_count,
            common_prefix: common_prefix.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || self.shard_count > usize::from(u16::MAX) {
            return Err(RankingError::InvalidConfig(format!(
                "index.shard_count must be in 1..={}, got {}",
                u16::MAX,
                self.shard_count
            )));
        }
        if self.initial_slots == 0 {
            return Err(RankingError::InvalidConfig(
                "index.initial_slots must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub scoring: ScoreWeights,
    pub container: ContainerLimits,
    pub index: IndexConfig,
}

impl RankingConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw)?;
        log::debug!(
            "ranking config loaded path={} shards={} max_sheets={}",
            path.display(),
            config.index.shard_count,
            config.container.max_sheets
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.container.validate()?;
        self.index.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RankingConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = RankingConfig::from_json_str(
            r#"{ "index": { "shard_count": 4, "common_prefix": "/home/me" } }"#,
        )
        .expect("partial config should parse");

        assert_eq!(config.index.shard_count, 4);
        assert_eq!(config.index.common_prefix.as_deref(), Some("/home/me"));
        assert_eq!(config.index.min_relevancy, 0);
        assert_eq!(config.scoring, ScoreWeights::default());
        assert_eq!(config.container.max_sheets, MAX_SHEETS);
    }

    #[test]
    fn untiered_gap_penalties_are_rejected() {
        let raw = r#"{ "scoring": { "gap_small": 10, "gap_medium": 2 } }"#;
        let err = RankingConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, RankingError::InvalidConfig(_)));
    }

    #[test]
    fn oversized_weights_are_rejected() {
        let weights = ScoreWeights {
            base: 1 << 29,
            ..ScoreWeights::default()
        };
        assert!(matches!(weights.validate(), Err(RankingError::InvalidConfig(_))));

        let raw = format!(r#"{{ "scoring": {{ "gap_large": {} }} }}"#, MAX_WEIGHT + 1);
        assert!(RankingConfig::from_json_str(&raw).is_err());
    }

    #[test]
    fn zero_shards_are_rejected() {
        let raw = r#"{ "index": { "shard_count": 0 } }"#;
        assert!(RankingConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = RankingConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, RankingError::Json(_)));
    }

    #[test]
    fn gap_penalty_is_tiered() {
        let weights = ScoreWeights::default();
        assert_eq!(weights.gap_penalty(0), 0);
        assert_eq!(weights.gap_penalty(1), weights.gap_small);
        assert_eq!(weights.gap_penalty(3), weights.gap_small);
        assert_eq!(weights.gap_penalty(4), weights.gap_medium);
        assert_eq!(weights.gap_penalty(10), weights.gap_medium);
        assert_eq!(weights.gap_penalty(11), weights.gap_large);
        assert_eq!(weights.gap_penalty(500), weights.gap_large);
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, br#"{ "container": { "max_sheets": 3 } }"#)
            .expect("write config");
        let config = RankingConfig::load(file.path()).expect("config file should load");
        assert_eq!(config.container.max_sheets, 3);
    }
}
