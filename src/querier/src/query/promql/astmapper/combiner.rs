//! Strategies for stitching per-shard legs back into one expression
//!
//! The sharding rule only decides *what* the legs are. How the executor
//! merges them is up to the [`Combiner`] it is configured with.

use serde::{Deserialize, Serialize};

use super::error::{AstMapperError, Result};
use crate::query::promql::ast::{BinaryOp, Expr, LabelMatcher, MatcherOp, VectorSelector};

/// Metric name of the selector that carries embedded legs
pub const EMBEDDED_QUERIES_METRIC: &str = "__embedded_queries__";
/// Label whose value holds the JSON-encoded legs
pub const EMBEDDED_QUERIES_LABEL: &str = "__queries__";

/// Merges an ordered list of per-shard legs into a single expression
#[cfg_attr(test, mockall::automock)]
pub trait Combiner: Send + Sync {
    fn combine(&self, legs: Vec<Expr>) -> Result<Expr>;
}

impl<F> Combiner for F
where
    F: Fn(Vec<Expr>) -> Result<Expr> + Send + Sync,
{
    fn combine(&self, legs: Vec<Expr>) -> Result<Expr> {
        self(legs)
    }
}

/// Joins the legs with the `or` set operator: `leg0 or leg1 or ...`
///
/// Every leg carries a distinct shard label, so `or` keeps all series of
/// every leg and the result can be evaluated by any PromQL engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrCombiner;

impl Combiner for OrCombiner {
    fn combine(&self, legs: Vec<Expr>) -> Result<Expr> {
        let mut legs = legs.into_iter();
        let first = legs
            .next()
            .ok_or_else(|| AstMapperError::Combine("no legs to combine".to_string()))?;
        Ok(legs.fold(first, |acc, leg| Expr::binary(BinaryOp::Or, acc, leg)))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct EmbeddedQueries {
    #[serde(rename = "Concat")]
    concat: Vec<String>,
}

/// Embeds the rendered legs into a reserved vector selector
///
/// `__embedded_queries__{__queries__="{\"Concat\":[...]}"}` is understood by
/// a sharding-aware executor which runs every leg on its own and
/// concatenates the results. Use [`decode_embedded`] to get the legs back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedCombiner;

impl Combiner for EmbeddedCombiner {
    fn combine(&self, legs: Vec<Expr>) -> Result<Expr> {
        if legs.is_empty() {
            return Err(AstMapperError::Combine("no legs to combine".to_string()));
        }

        let embedded = EmbeddedQueries {
            concat: legs.iter().map(|leg| leg.to_string()).collect(),
        };
        let encoded = serde_json::to_string(&embedded)
            .map_err(|e| AstMapperError::Combine(format!("failed to encode legs: {e}")))?;

        Ok(Expr::VectorSelector(
            VectorSelector::new(EMBEDDED_QUERIES_METRIC)
                .with_matcher(LabelMatcher::equal(EMBEDDED_QUERIES_LABEL, &encoded)),
        ))
    }
}

/// Extract the leg queries from a selector built by [`EmbeddedCombiner`]
pub fn decode_embedded(expr: &Expr) -> Result<Vec<String>> {
    let Expr::VectorSelector(vs) = expr else {
        return Err(AstMapperError::Combine(format!(
            "expected embedded queries selector, got {}",
            expr.kind()
        )));
    };
    if vs.name.as_deref() != Some(EMBEDDED_QUERIES_METRIC) {
        return Err(AstMapperError::Combine(format!(
            "selector {:?} does not embed queries",
            vs.name
        )));
    }

    let matcher = vs
        .matchers
        .iter()
        .find(|m| m.name == EMBEDDED_QUERIES_LABEL && m.op == MatcherOp::Equal)
        .ok_or_else(|| {
            AstMapperError::Combine(format!("missing {EMBEDDED_QUERIES_LABEL} matcher"))
        })?;

    let embedded: EmbeddedQueries = serde_json::from_str(&matcher.value)
        .map_err(|e| AstMapperError::Combine(format!("failed to decode legs: {e}")))?;
    Ok(embedded.concat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(name: &str) -> Expr {
        Expr::from(VectorSelector::new(name))
    }

    #[test]
    fn test_or_combiner() {
        let combined = OrCombiner.combine(vec![leg("a"), leg("b"), leg("c")]).unwrap();
        assert_eq!(combined.to_string(), "a or b or c");

        let single = OrCombiner.combine(vec![leg("a")]).unwrap();
        assert_eq!(single, leg("a"));

        assert!(matches!(
            OrCombiner.combine(vec![]),
            Err(AstMapperError::Combine(_))
        ));
    }

    #[test]
    fn test_embedded_combiner_round_trip() {
        let legs = vec![
            Expr::from(VectorSelector::new("a").with_matcher(LabelMatcher::equal("job", "x"))),
            leg("b"),
        ];
        let combined = EmbeddedCombiner.combine(legs).unwrap();

        assert_eq!(
            combined.to_string(),
            r#"__embedded_queries__{__queries__="{\"Concat\":[\"a{job=\\\"x\\\"}\",\"b\"]}"}"#
        );
        assert_eq!(
            decode_embedded(&combined).unwrap(),
            vec![r#"a{job="x"}"#.to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_decode_embedded_rejects_other_nodes() {
        assert!(decode_embedded(&Expr::NumberLiteral(1.0)).is_err());
        assert!(decode_embedded(&leg("a")).is_err());
        assert!(decode_embedded(&leg(EMBEDDED_QUERIES_METRIC)).is_err());

        let garbage = Expr::from(
            VectorSelector::new(EMBEDDED_QUERIES_METRIC)
                .with_matcher(LabelMatcher::equal(EMBEDDED_QUERIES_LABEL, "not json")),
        );
        assert!(decode_embedded(&garbage).is_err());
    }

    #[test]
    fn test_closure_combiner() {
        let count_legs =
            |legs: Vec<Expr>| -> Result<Expr> { Ok(Expr::NumberLiteral(legs.len() as f64)) };
        assert_eq!(
            count_legs.combine(vec![leg("a"), leg("b")]).unwrap(),
            Expr::NumberLiteral(2.0)
        );
    }
}
