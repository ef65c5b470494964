//! Default check for subtrees that can be evaluated shard by shard

use crate::query::promql::ast::{AggregationOp, Expr};

/// Aggregations whose result can be rebuilt from per-shard partial results
const SUMMABLE_AGGREGATIONS: [AggregationOp; 4] = [
    AggregationOp::Sum,
    AggregationOp::Min,
    AggregationOp::Max,
    AggregationOp::Count,
];

/// Functions that need to see every series at once
const NON_PARALLEL_FUNCTIONS: [&str; 4] = [
    "histogram_quantile",
    "quantile_over_time",
    "absent",
    "absent_over_time",
];

/// Reports whether every part of a subtree can run independently per shard
///
/// Binary expressions match series from both sides and are never
/// parallelizable. An aggregation qualifies only if it is summable, has no
/// further aggregation underneath it and its operand is parallelizable.
pub fn can_parallelize(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate(agg) => {
            SUMMABLE_AGGREGATIONS.contains(&agg.op)
                && !contains_aggregate(&agg.expr)
                && can_parallelize(&agg.expr)
                && agg.param.as_deref().is_none_or(can_parallelize)
        }
        Expr::Binary(_) => false,
        Expr::Call(call) => {
            parallelizable_function(&call.func) && call.args.iter().all(can_parallelize)
        }
        Expr::Paren(paren) => can_parallelize(&paren.expr),
        Expr::Subquery(sq) => can_parallelize(&sq.expr),
        Expr::Unary(_)
        | Expr::VectorSelector(_)
        | Expr::MatrixSelector(_)
        | Expr::NumberLiteral(_)
        | Expr::StringLiteral(_) => true,
        Expr::Extension(_) => false,
    }
}

pub fn parallelizable_function(name: &str) -> bool {
    !NON_PARALLEL_FUNCTIONS.contains(&name)
}

/// Reports whether any node of the subtree is an aggregation
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate(_) => true,
        Expr::Binary(bin) => contains_aggregate(&bin.lhs) || contains_aggregate(&bin.rhs),
        Expr::Call(call) => call.args.iter().any(contains_aggregate),
        Expr::Paren(paren) => contains_aggregate(&paren.expr),
        Expr::Unary(unary) => contains_aggregate(&unary.expr),
        Expr::Subquery(sq) => contains_aggregate(&sq.expr),
        Expr::MatrixSelector(ms) => contains_aggregate(&ms.selector),
        Expr::VectorSelector(_)
        | Expr::NumberLiteral(_)
        | Expr::StringLiteral(_)
        | Expr::Extension(_) => false,
    }
}
