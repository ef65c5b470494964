//! Query AST sharding
//!
//! Rewrites a PromQL expression into independent per-shard legs plus a
//! recombination step, so one logical query can be executed concurrently
//! against every shard and merged afterwards.
//!
//! # Modules
//!
//! - [`shard`] - encoding of the reserved shard label value
//! - [`selector`] - injection of the shard matcher into selectors
//! - [`mapper`] - generic pre-order tree rewriting
//! - [`clone`] - deep copies of subtrees
//! - [`summer`] - the rule splitting parallelizable `sum` aggregations
//! - [`parallel`] - default parallelizability check
//! - [`combiner`] - strategies merging per-shard legs
//!
//! # Example
//!
//! ```ignore
//! use querier::query::promql::{astmapper, parser};
//!
//! let counter = prometheus::IntCounter::new("sharded_queries_total", "Sharded queries")?;
//! let mapper = astmapper::new_shard_summer(
//!     4,
//!     Some(Box::new(astmapper::OrCombiner)),
//!     astmapper::can_parallelize,
//!     counter,
//! )?;
//! let sharded = mapper.map(parser::parse("sum(rate(http_requests_total[5m]))")?)?;
//! ```
//!
//! Rewriting is synchronous and holds no shared mutable state apart from the
//! counter, so one mapper can serve concurrent queries.

pub mod clone;
pub mod combiner;
pub mod error;
pub mod mapper;
pub mod parallel;
pub mod selector;
pub mod shard;
pub mod summer;

pub use clone::clone_node;
pub use combiner::{decode_embedded, Combiner, EmbeddedCombiner, OrCombiner};
pub use error::{AstMapperError, Result};
pub use mapper::{AstMapper, AstNodeMapper, MapperFn, MultiMapper, NodeMapper};
pub use parallel::can_parallelize;
pub use selector::inject_shard;
pub use shard::{decode, encode, find_shard_matcher, ShardAnnotation, SHARD_LABEL};
pub use summer::{new_shard_summer, ShardSummer};
