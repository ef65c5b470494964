//! Pre-order tree rewriting
//!
//! A [`NodeMapper`] decides what happens to a single node. [`AstNodeMapper`]
//! drives it over a whole tree: the node mapper sees every node first and
//! either finishes it (`done = true`, no further descent) or hands it back
//! for structural recursion into its children.

use super::error::Result;
use crate::query::promql::ast::{
    AggregateExpr, BinaryExpr, Call, Expr, ParenExpr, SubqueryExpr, UnaryExpr,
};

/// Rewrites a whole expression tree
pub trait AstMapper: Send + Sync {
    fn map(&self, expr: Expr) -> Result<Expr>;
}

/// Rewrites a single node
pub trait NodeMapper: Send + Sync {
    /// Returns the rewritten node and whether it is final. A final node is
    /// returned as is; otherwise its children are mapped in turn.
    fn map_node(&self, node: Expr) -> Result<(Expr, bool)>;
}

/// Adapts a closure into a [`NodeMapper`]
pub struct MapperFn<F>(F);

impl<F> MapperFn<F>
where
    F: Fn(Expr) -> Result<(Expr, bool)> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> NodeMapper for MapperFn<F>
where
    F: Fn(Expr) -> Result<(Expr, bool)> + Send + Sync,
{
    fn map_node(&self, node: Expr) -> Result<(Expr, bool)> {
        (self.0)(node)
    }
}

/// Applies a [`NodeMapper`] to every node of a tree, in pre-order
pub struct AstNodeMapper<M> {
    node_mapper: M,
}

impl<M: NodeMapper> AstNodeMapper<M> {
    pub fn new(node_mapper: M) -> Self {
        Self { node_mapper }
    }

    fn map_boxed(&self, expr: Box<Expr>) -> Result<Box<Expr>> {
        self.map(*expr).map(Box::new)
    }
}

impl<M: NodeMapper> AstMapper for AstNodeMapper<M> {
    fn map(&self, expr: Expr) -> Result<Expr> {
        let (node, done) = self.node_mapper.map_node(expr)?;
        if done {
            return Ok(node);
        }

        let mapped = match node {
            Expr::Aggregate(AggregateExpr {
                op,
                expr,
                param,
                modifier,
            }) => Expr::Aggregate(AggregateExpr {
                op,
                expr: self.map_boxed(expr)?,
                param: param.map(|p| self.map_boxed(p)).transpose()?,
                modifier,
            }),
            Expr::Binary(BinaryExpr {
                op,
                lhs,
                rhs,
                modifier,
            }) => Expr::Binary(BinaryExpr {
                op,
                lhs: self.map_boxed(lhs)?,
                rhs: self.map_boxed(rhs)?,
                modifier,
            }),
            Expr::Call(Call { func, args }) => Expr::Call(Call {
                func,
                args: args
                    .into_iter()
                    .map(|arg| self.map(arg))
                    .collect::<Result<Vec<_>>>()?,
            }),
            Expr::Paren(ParenExpr { expr }) => Expr::Paren(ParenExpr {
                expr: self.map_boxed(expr)?,
            }),
            Expr::Unary(UnaryExpr { expr }) => Expr::Unary(UnaryExpr {
                expr: self.map_boxed(expr)?,
            }),
            Expr::Subquery(SubqueryExpr {
                expr,
                range,
                step,
                offset,
                at,
            }) => Expr::Subquery(SubqueryExpr {
                expr: self.map_boxed(expr)?,
                range,
                step,
                offset,
                at,
            }),
            leaf @ (Expr::VectorSelector(_)
            | Expr::MatrixSelector(_)
            | Expr::NumberLiteral(_)
            | Expr::StringLiteral(_)
            | Expr::Extension(_)) => leaf,
        };

        Ok(mapped)
    }
}

/// Runs several mappers one after the other
#[derive(Default)]
pub struct MultiMapper {
    mappers: Vec<Box<dyn AstMapper>>,
}

impl MultiMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapper(mut self, mapper: impl AstMapper + 'static) -> Self {
        self.register(mapper);
        self
    }

    pub fn register(&mut self, mapper: impl AstMapper + 'static) {
        self.mappers.push(Box::new(mapper));
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl AstMapper for MultiMapper {
    fn map(&self, expr: Expr) -> Result<Expr> {
        self.mappers
            .iter()
            .try_fold(expr, |expr, mapper| mapper.map(expr))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::query::promql::ast::{AggregationOp, BinaryOp, LabelMatcher, VectorSelector};
    use crate::query::promql::astmapper::AstMapperError;

    fn query() -> Expr {
        // sum(rate(a[1m])) + b
        Expr::binary(
            BinaryOp::Add,
            Expr::aggregate(
                AggregationOp::Sum,
                None,
                Expr::call(
                    "rate",
                    vec![Expr::matrix(VectorSelector::new("a"), Duration::from_secs(60))],
                ),
            ),
            Expr::from(VectorSelector::new("b")),
        )
    }

    fn add_env_matcher(node: Expr) -> Result<(Expr, bool)> {
        match node {
            Expr::VectorSelector(vs) => Ok((
                Expr::VectorSelector(vs.with_matcher(LabelMatcher::equal("env", "prod"))),
                true,
            )),
            other => Ok((other, false)),
        }
    }

    #[test]
    fn test_identity_mapper_preserves_tree() {
        let mapper = AstNodeMapper::new(MapperFn::new(|node| Ok((node, false))));
        assert_eq!(mapper.map(query()).unwrap(), query());
    }

    #[test]
    fn test_visits_nodes_in_pre_order() {
        let visited = Mutex::new(Vec::new());
        let mapper = AstNodeMapper::new(MapperFn::new(|node: Expr| {
            visited.lock().unwrap().push(node.kind());
            Ok((node, false))
        }));

        mapper.map(query()).unwrap();

        assert_eq!(
            visited.into_inner().unwrap(),
            vec![
                "binary expression",
                "aggregate",
                "function call",
                "matrix selector",
                "vector selector",
            ]
        );
    }

    #[test]
    fn test_rewrites_reachable_leaves() {
        let mapper = AstNodeMapper::new(MapperFn::new(add_env_matcher));
        let mapped = mapper.map(query()).unwrap();
        // matrix selectors are leaves, only the bare vector selector is reached
        assert_eq!(mapped.to_string(), r#"sum(rate(a[1m])) + b{env="prod"}"#);
    }

    #[test]
    fn test_done_stops_descent() {
        let mapper = AstNodeMapper::new(MapperFn::new(|node: Expr| match node {
            Expr::Aggregate(_) => Ok((node, true)),
            Expr::MatrixSelector(_) => Err(AstMapperError::UnsupportedNode(
                "must not be visited".to_string(),
            )),
            other => Ok((other, false)),
        }));
        assert_eq!(mapper.map(query()).unwrap(), query());
    }

    #[test]
    fn test_error_aborts_traversal() {
        let mapper = AstNodeMapper::new(MapperFn::new(|node: Expr| match node {
            Expr::VectorSelector(_) => Err(AstMapperError::UnsupportedNode("boom".to_string())),
            other => Ok((other, false)),
        }));
        assert_eq!(
            mapper.map(query()),
            Err(AstMapperError::UnsupportedNode("boom".to_string()))
        );
    }

    #[test]
    fn test_multi_mapper_applies_in_order() {
        let wrap_in_parens = AstNodeMapper::new(MapperFn::new(|node: Expr| match node {
            Expr::VectorSelector(_) => Ok((
                Expr::Paren(ParenExpr {
                    expr: Box::new(node),
                }),
                true,
            )),
            other => Ok((other, false)),
        }));

        let multi = MultiMapper::new()
            .with_mapper(AstNodeMapper::new(MapperFn::new(add_env_matcher)))
            .with_mapper(wrap_in_parens);
        assert_eq!(multi.len(), 2);

        let mapped = multi.map(Expr::from(VectorSelector::new("b"))).unwrap();
        assert_eq!(mapped.to_string(), r#"(b{env="prod"})"#);
    }

    #[test]
    fn test_empty_multi_mapper_is_identity() {
        let multi = MultiMapper::new();
        assert!(multi.is_empty());
        assert_eq!(multi.map(query()).unwrap(), query());
    }
}
