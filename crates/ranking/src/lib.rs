//! Fuzzy ranking core for an incremental launcher.
//!
//! This crate provides:
//! - Needle preparation and optimal-alignment fuzzy scoring
//! - A deduplicating, lazily materializing result container
//! - A bounded callback registry for result factories
//! - A sharded in-memory path index
//! - Generation-based cancellation and a query dispatcher tying them together

pub mod cancel;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod needle;
pub mod registry;
pub mod score;

// Re-export main types
pub use cancel::{CancellationToken, GenerationTracker};
pub use config::{ContainerLimits, IndexConfig, RankingConfig, ScoreWeights};
pub use container::{MatchCandidate, ResultContainer};
pub use dispatch::{FnProducer, Producer, QueryDispatcher, QueryRound};
pub use error::{RankingError, Result};
pub use index::{PathIndex, PathMaterializer, PathRef, ScanOutcome, ScanStats};
pub use needle::{prepare_needle, release_needle, Needle};
pub use registry::{CallbackRegistry, MatchFactory, Payload, PayloadRelease, SlotId};
pub use score::{has_match, match_positions, score, score_with_offset, Score, ScoreScratch, Scorer};
