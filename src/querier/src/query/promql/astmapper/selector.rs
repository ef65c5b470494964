//! Shard matcher injection into leaf selectors

use super::error::{AstMapperError, Result};
use super::shard::ShardAnnotation;
use crate::query::promql::ast::{Expr, MatrixSelector, VectorSelector};

/// Pin a vector or matrix selector to one shard
///
/// The shard matcher is prepended; every other part of the selector is kept
/// as is. A matrix selector must wrap a plain vector selector.
pub fn inject_shard(shard: usize, of: usize, selector: Expr) -> Result<Expr> {
    let annotation = ShardAnnotation::new(shard, of)?;

    match selector {
        Expr::VectorSelector(vs) => Ok(Expr::VectorSelector(shard_vector_selector(
            &annotation,
            vs,
        ))),
        Expr::MatrixSelector(MatrixSelector { selector, range }) => match *selector {
            Expr::VectorSelector(vs) => Ok(Expr::MatrixSelector(MatrixSelector {
                selector: Box::new(Expr::VectorSelector(shard_vector_selector(
                    &annotation,
                    vs,
                ))),
                range,
            })),
            other => Err(AstMapperError::UnsupportedNode(format!(
                "invalid selector type: {}",
                other.kind()
            ))),
        },
        other => Err(AstMapperError::UnsupportedNode(format!(
            "cannot shard {}",
            other.kind()
        ))),
    }
}

fn shard_vector_selector(shard: &ShardAnnotation, selector: VectorSelector) -> VectorSelector {
    let VectorSelector {
        name,
        matchers: original,
        offset,
        at,
    } = selector;

    let mut matchers = Vec::with_capacity(original.len() + 1);
    matchers.push(shard.matcher());
    matchers.extend(original);

    VectorSelector {
        name,
        matchers,
        offset,
        at,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::query::promql::ast::{AtModifier, LabelMatcher, Offset};
    use crate::query::promql::astmapper::SHARD_LABEL;

    fn selector() -> VectorSelector {
        VectorSelector::new("http_requests_total")
            .with_matcher(LabelMatcher::equal("job", "api"))
            .with_matcher(LabelMatcher::regex_match("method", "GET|POST"))
            .with_offset(Offset::Neg(Duration::from_secs(60)))
    }

    #[test]
    fn test_vector_selector_gets_leading_shard_matcher() {
        let mut original = selector();
        original.at = Some(AtModifier::End);

        let sharded = inject_shard(1, 4, Expr::VectorSelector(original.clone())).unwrap();
        let Expr::VectorSelector(vs) = sharded else {
            panic!("Expected VectorSelector");
        };

        assert_eq!(vs.name, original.name);
        assert_eq!(vs.offset, original.offset);
        assert_eq!(vs.at, original.at);
        assert_eq!(vs.matchers[0], LabelMatcher::equal(SHARD_LABEL, "1_of_4"));
        assert_eq!(&vs.matchers[1..], original.matchers.as_slice());
    }

    #[test]
    fn test_matrix_selector_keeps_range() {
        let sharded = inject_shard(0, 2, Expr::matrix(selector(), Duration::from_secs(300))).unwrap();
        assert_eq!(
            sharded.to_string(),
            r#"http_requests_total{__query_shard__="0_of_2", job="api", method=~"GET|POST"}[5m] offset -1m"#
        );
    }

    #[test]
    fn test_matrix_selector_with_invalid_inner_node() {
        let bogus = Expr::MatrixSelector(MatrixSelector {
            selector: Box::new(Expr::NumberLiteral(1.0)),
            range: Duration::from_secs(60),
        });
        let err = inject_shard(0, 2, bogus).unwrap_err();
        assert_eq!(
            err,
            AstMapperError::UnsupportedNode("invalid selector type: number literal".to_string())
        );
    }

    #[test]
    fn test_non_selector_is_rejected() {
        let err = inject_shard(0, 2, Expr::NumberLiteral(1.0)).unwrap_err();
        assert!(matches!(err, AstMapperError::UnsupportedNode(_)));
    }

    #[test]
    fn test_out_of_range_shard_is_rejected() {
        let err = inject_shard(2, 2, Expr::VectorSelector(selector())).unwrap_err();
        assert_eq!(err, AstMapperError::ShardOutOfBounds { shard: 2, of: 2 });
    }
}
