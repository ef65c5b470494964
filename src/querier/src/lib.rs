//! PromQL query sharding for a query frontend
//!
//! Parses PromQL, splits parallelizable `sum` aggregations into per-shard
//! legs and recombines them into a single executable query.

pub mod metrics;
pub mod query;

pub use query::error::QuerierError;
pub use query::promql::sharding::{ShardedQuery, ShardingPlanner};
