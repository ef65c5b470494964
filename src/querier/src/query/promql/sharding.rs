//! Configuration-driven entry point for query sharding

use common::config::{CombinerKind, Configuration};
use prometheus::Registry;

use super::ast::Expr;
use super::astmapper::{
    can_parallelize, new_shard_summer, AstMapper, AstNodeMapper, Combiner, EmbeddedCombiner,
    OrCombiner, ShardSummer,
};
use super::parser;
use crate::metrics::ShardingMetrics;
use crate::query::error::QuerierError;

/// Outcome of planning one query
#[derive(Debug, Clone, PartialEq)]
pub struct ShardedQuery {
    /// Query text as received
    pub original: String,
    /// Rewritten expression, identical to the parsed input when not sharded
    pub expr: Expr,
    /// Whether the shard summer ran over the query
    pub sharded: bool,
}

impl ShardedQuery {
    /// The rewritten query rendered back to PromQL
    pub fn query(&self) -> String {
        self.expr.to_string()
    }
}

/// Parses queries and rewrites them with the configured shard summer
pub struct ShardingPlanner {
    enabled: bool,
    shard_count: usize,
    summer: AstNodeMapper<ShardSummer>,
    metrics: ShardingMetrics,
}

impl ShardingPlanner {
    pub fn new(config: &Configuration, registry: &Registry) -> Result<Self, QuerierError> {
        let metrics = ShardingMetrics::new(registry, &config.metrics.namespace)?;

        let combiner: Box<dyn Combiner> = match config.sharding.combiner {
            CombinerKind::Or => Box::new(OrCombiner),
            CombinerKind::Embedded => Box::new(EmbeddedCombiner),
        };
        let summer = new_shard_summer(
            config.sharding.shard_count,
            Some(combiner),
            can_parallelize,
            metrics.sharded_queries.clone(),
        )?;

        tracing::info!(
            enabled = config.sharding.enabled,
            shard_count = config.sharding.shard_count,
            combiner = ?config.sharding.combiner,
            "Query sharding planner initialized"
        );

        Ok(Self {
            enabled: config.sharding.enabled,
            shard_count: config.sharding.shard_count,
            summer,
            metrics,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn metrics(&self) -> &ShardingMetrics {
        &self.metrics
    }

    /// Parse `query` and split its parallelizable sums
    ///
    /// Sharding is skipped when disabled or when there is a single shard.
    pub fn plan(&self, query: &str) -> Result<ShardedQuery, QuerierError> {
        let expr = parser::parse(query)?;

        if !self.enabled || self.shard_count <= 1 {
            tracing::debug!(query, "Sharding skipped");
            return Ok(ShardedQuery {
                original: query.to_string(),
                expr,
                sharded: false,
            });
        }

        let expr = self.summer.map(expr)?;
        tracing::debug!(query, shard_count = self.shard_count, "Query sharded");

        Ok(ShardedQuery {
            original: query.to_string(),
            expr,
            sharded: true,
        })
    }
}
