use thiserror::Error;

/// Errors raised while rewriting a query tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AstMapperError {
    /// The mapper was constructed with missing or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A shard label value does not follow the `<shard>_of_<of>` format
    #[error("Invalid shard label value: {0}")]
    Decode(String),
    /// A shard label value names a shard outside of its range
    #[error("Shards out of bounds: [{shard}] >= [{of}]")]
    ShardOutOfBounds { shard: usize, of: usize },
    /// The node kind cannot be cloned or rewritten
    #[error("Unsupported node: {0}")]
    UnsupportedNode(String),
    /// The combiner failed to merge per-shard legs
    #[error("Failed to combine sharded legs: {0}")]
    Combine(String),
}

pub type Result<T> = std::result::Result<T, AstMapperError>;
