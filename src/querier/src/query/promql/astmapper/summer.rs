//! Fan-out of parallelizable `sum` aggregations across shards
//!
//! A parallelizable `sum` is split into one leg per shard. Each leg is the
//! original inner expression with every selector pinned to its shard through
//! the [`SHARD_LABEL`] matcher, summed while keeping the shard label. The
//! legs are stitched together by the configured [`Combiner`] and summed again
//! by a parent aggregation that drops the shard label:
//!
//! ```text
//! sum by (foo) (rate(bar{baz="blip"}[1m]))
//!
//! sum by (foo) (
//!   sum by (foo, __query_shard__) (rate(bar{__query_shard__="0_of_2", baz="blip"}[1m]))
//!   <combined with>
//!   sum by (foo, __query_shard__) (rate(bar{__query_shard__="1_of_2", baz="blip"}[1m]))
//! )
//! ```
//!
//! Legs are rewritten by a copy of the summer bound to their shard, so a
//! parallelizable `sum` nested inside a leg is split again. Fan-out grows
//! with every nesting level (N + N·N legs for two levels).

use std::sync::Arc;

use prometheus::IntCounter;

use super::clone::clone_node;
use super::combiner::Combiner;
use super::error::{AstMapperError, Result};
use super::mapper::{AstMapper, AstNodeMapper, NodeMapper};
use super::selector::inject_shard;
use super::shard::SHARD_LABEL;
use crate::query::promql::ast::{AggregateExpr, AggregationOp, Expr, LabelModifier};

/// Decides whether an aggregation subtree may be split across shards
pub type Predicate = dyn Fn(&Expr) -> bool + Send + Sync;

struct SummerConfig {
    shard_count: usize,
    combiner: Box<dyn Combiner>,
    can_parallelize: Box<Predicate>,
    sharded_queries: IntCounter,
}

/// [`NodeMapper`] splitting parallelizable `sum` aggregations by shard
#[derive(Clone)]
pub struct ShardSummer {
    config: Arc<SummerConfig>,
    current_shard: Option<usize>,
}

impl std::fmt::Debug for ShardSummer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSummer")
            .field("shard_count", &self.config.shard_count)
            .field("current_shard", &self.current_shard)
            .finish_non_exhaustive()
    }
}

impl ShardSummer {
    /// Create a summer fanning out to `shard_count` shards
    ///
    /// `sharded_queries` is incremented by `shard_count` on every split.
    pub fn new(
        shard_count: usize,
        combiner: Option<Box<dyn Combiner>>,
        can_parallelize: impl Fn(&Expr) -> bool + Send + Sync + 'static,
        sharded_queries: IntCounter,
    ) -> Result<Self> {
        let combiner = combiner.ok_or_else(|| {
            AstMapperError::Configuration("combiner required and not passed".to_string())
        })?;
        if shard_count == 0 {
            return Err(AstMapperError::Configuration(
                "shard count must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config: Arc::new(SummerConfig {
                shard_count,
                combiner,
                can_parallelize: Box::new(can_parallelize),
                sharded_queries,
            }),
            current_shard: None,
        })
    }

    /// A summer with the same configuration, rewriting the leg of one shard
    pub fn with_current_shard(&self, shard: usize) -> Self {
        Self {
            config: Arc::clone(&self.config),
            current_shard: Some(shard),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.config.shard_count
    }

    pub fn current_shard(&self) -> Option<usize> {
        self.current_shard
    }

    fn shard_sum(&self, expr: &AggregateExpr) -> Result<Expr> {
        let (parent_grouping, child_grouping) = split_grouping(expr.modifier.as_ref());

        let mut legs = Vec::with_capacity(self.config.shard_count);
        for shard in 0..self.config.shard_count {
            let cloned = clone_node(&expr.expr)?;
            let sharded = AstNodeMapper::new(self.with_current_shard(shard)).map(cloned)?;
            legs.push(Expr::Aggregate(AggregateExpr {
                op: expr.op,
                expr: Box::new(sharded),
                param: None,
                modifier: Some(child_grouping.clone()),
            }));
        }

        let combined = self.config.combiner.combine(legs)?;
        self.config
            .sharded_queries
            .inc_by(self.config.shard_count as u64);

        Ok(Expr::Aggregate(AggregateExpr {
            op: expr.op,
            expr: Box::new(combined),
            param: expr.param.clone(),
            modifier: Some(parent_grouping),
        }))
    }
}

/// Grouping of the parent aggregation and of every per-shard leg
fn split_grouping(modifier: Option<&LabelModifier>) -> (LabelModifier, LabelModifier) {
    let shard_label = || vec![SHARD_LABEL.to_string()];

    match modifier {
        Some(LabelModifier::Without(labels)) => (
            LabelModifier::Without(shard_label()),
            LabelModifier::Without(labels.clone()),
        ),
        Some(LabelModifier::By(labels)) if !labels.is_empty() => {
            let mut child = labels.clone();
            child.push(SHARD_LABEL.to_string());
            (LabelModifier::By(labels.clone()), LabelModifier::By(child))
        }
        _ => (
            LabelModifier::Without(shard_label()),
            LabelModifier::By(shard_label()),
        ),
    }
}

impl NodeMapper for ShardSummer {
    fn map_node(&self, node: Expr) -> Result<(Expr, bool)> {
        if let Expr::Aggregate(agg) = &node {
            if agg.op == AggregationOp::Sum && (self.config.can_parallelize)(&node) {
                return Ok((self.shard_sum(agg)?, true));
            }
            return Ok((node, false));
        }

        match node {
            Expr::VectorSelector(_) | Expr::MatrixSelector(_) => match self.current_shard {
                Some(shard) => Ok((inject_shard(shard, self.config.shard_count, node)?, true)),
                None => Ok((node, true)),
            },
            other => Ok((other, false)),
        }
    }
}

/// Build a mapper that fans parallelizable `sum` aggregations out to
/// `shard_count` shards
pub fn new_shard_summer(
    shard_count: usize,
    combiner: Option<Box<dyn Combiner>>,
    can_parallelize: impl Fn(&Expr) -> bool + Send + Sync + 'static,
    sharded_queries: IntCounter,
) -> Result<AstNodeMapper<ShardSummer>> {
    ShardSummer::new(shard_count, combiner, can_parallelize, sharded_queries).map(AstNodeMapper::new)
}
