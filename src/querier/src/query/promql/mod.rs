//! PromQL query sharding
//!
//! This module rewrites parsed PromQL queries so that parallelizable `sum`
//! aggregations fan out across a fixed number of shards, each leg reading
//! only the series assigned to one shard.
//!
//! # Architecture
//!
//! ```text
//! PromQL String → Parser → AST (Expr) → Shard Summer → Combined AST → PromQL String
//! ```
//!
//! # Modules
//!
//! - [`ast`] - Closed PromQL expression tree with a PromQL printer
//! - [`parser`] - PromQL parsing using the promql-parser crate
//! - [`astmapper`] - Tree rewriting framework and the shard summer
//! - [`sharding`] - Configuration-driven planner tying parsing and rewriting together
//! - [`error`] - Error types for PromQL operations
//!
//! # Example
//!
//! ```ignore
//! use querier::query::promql::{astmapper, parser};
//!
//! let expr = parser::parse(r#"sum(rate(http_requests_total{job="api"}[5m]))"#)?;
//! let summer = astmapper::new_shard_summer(
//!     2,
//!     Some(Box::new(astmapper::OrCombiner)),
//!     astmapper::can_parallelize,
//!     counter,
//! )?;
//! let sharded = summer.map(expr)?;
//! println!("{sharded}");
//! ```
//!
//! # Sharding
//!
//! Only `sum` is split. A `sum` is split when the parallelizability
//! predicate accepts it; the default predicate accepts summable
//! aggregations whose subtree holds no further aggregation, binary
//! expression or non-parallelizable function. Every selector below a split
//! point carries an equality matcher on `__query_shard__` with a value of
//! the form `<shard>_of_<total>`.

pub mod ast;
pub mod astmapper;
pub mod error;
pub mod parser;
pub mod sharding;
