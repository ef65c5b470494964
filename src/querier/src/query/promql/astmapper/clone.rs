//! Deep copies of expression subtrees

use super::error::{AstMapperError, Result};
use crate::query::promql::ast::{
    AggregateExpr, BinaryExpr, Call, Expr, MatrixSelector, ParenExpr, SubqueryExpr, UnaryExpr,
};

/// Deep copy of a subtree, so per-shard branches never share nodes
///
/// Extension nodes are reference counted and opaque; they cannot be copied,
/// and cloning a subtree that contains one fails.
pub fn clone_node(expr: &Expr) -> Result<Expr> {
    let cloned = match expr {
        Expr::Aggregate(agg) => Expr::Aggregate(AggregateExpr {
            op: agg.op,
            expr: Box::new(clone_node(&agg.expr)?),
            param: agg
                .param
                .as_deref()
                .map(clone_node)
                .transpose()?
                .map(Box::new),
            modifier: agg.modifier.clone(),
        }),
        Expr::VectorSelector(vs) => Expr::VectorSelector(vs.clone()),
        Expr::MatrixSelector(ms) => Expr::MatrixSelector(MatrixSelector {
            selector: Box::new(clone_node(&ms.selector)?),
            range: ms.range,
        }),
        Expr::Binary(bin) => Expr::Binary(BinaryExpr {
            op: bin.op,
            lhs: Box::new(clone_node(&bin.lhs)?),
            rhs: Box::new(clone_node(&bin.rhs)?),
            modifier: bin.modifier.clone(),
        }),
        Expr::Call(call) => Expr::Call(Call {
            func: call.func.clone(),
            args: call.args.iter().map(clone_node).collect::<Result<Vec<_>>>()?,
        }),
        Expr::Paren(paren) => Expr::Paren(ParenExpr {
            expr: Box::new(clone_node(&paren.expr)?),
        }),
        Expr::Unary(unary) => Expr::Unary(UnaryExpr {
            expr: Box::new(clone_node(&unary.expr)?),
        }),
        Expr::Subquery(sq) => Expr::Subquery(SubqueryExpr {
            expr: Box::new(clone_node(&sq.expr)?),
            range: sq.range,
            step: sq.step,
            offset: sq.offset,
            at: sq.at,
        }),
        Expr::NumberLiteral(val) => Expr::NumberLiteral(*val),
        Expr::StringLiteral(val) => Expr::StringLiteral(val.clone()),
        Expr::Extension(ext) => {
            return Err(AstMapperError::UnsupportedNode(format!(
                "cannot clone extension node `{}`",
                ext.node.name()
            )));
        }
    };
    Ok(cloned)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::query::promql::ast::{
        AggregationOp, BinaryOp, Extension, ExtensionNode, LabelMatcher, LabelModifier,
        VectorSelector,
    };

    #[derive(Debug)]
    struct Remote;

    impl ExtensionNode for Remote {
        fn name(&self) -> &str {
            "remote_read"
        }
    }

    #[test]
    fn test_clone_is_equal_to_original() {
        let expr = Expr::Aggregate(AggregateExpr {
            op: AggregationOp::Quantile,
            expr: Box::new(Expr::binary(
                BinaryOp::Div,
                Expr::call(
                    "rate",
                    vec![Expr::matrix(
                        VectorSelector::new("errors").with_matcher(LabelMatcher::equal("job", "api")),
                        Duration::from_secs(300),
                    )],
                ),
                Expr::Paren(ParenExpr {
                    expr: Box::new(Expr::Unary(UnaryExpr {
                        expr: Box::new(Expr::NumberLiteral(2.0)),
                    })),
                }),
            )),
            param: Some(Box::new(Expr::NumberLiteral(0.9))),
            modifier: Some(LabelModifier::by(&["job"])),
        });

        assert_eq!(clone_node(&expr).unwrap(), expr);
    }

    #[test]
    fn test_clone_rejects_extension() {
        let ext = Expr::Extension(Extension {
            node: Arc::new(Remote),
        });
        let nested = Expr::call("abs", vec![ext.clone()]);

        for expr in [ext, nested] {
            let err = clone_node(&expr).unwrap_err();
            assert_eq!(
                err,
                AstMapperError::UnsupportedNode("cannot clone extension node `remote_read`".to_string())
            );
        }
    }
}
