use crate::query::promql::astmapper::AstMapperError;

#[derive(Debug, thiserror::Error)]
pub enum QuerierError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Query sharding failed: {0}")]
    Sharding(#[from] AstMapperError),
    #[error("Initialization error: {0}")]
    Initialization(String),
}
