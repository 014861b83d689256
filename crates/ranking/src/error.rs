#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Callback registry is full ({0} slots)")]
    RegistryFull(usize),

    #[error("Result container is saturated ({0} candidates)")]
    ContainerSaturated(usize),

    #[error("Path index has been shut down")]
    IndexShutdown,

    #[error("Invalid shard {shard} (index has {shard_count} shards)")]
    InvalidShard { shard: usize, shard_count: usize },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RankingError>;

/// Maps a failed reservation into an allocation error naming what grew.
pub(crate) fn allocation_error(what: &str, error: std::collections::TryReserveError) -> RankingError {
    RankingError::Allocation(format!("{what}: {error}"))
}
