//! PromQL parser wrapper
//!
//! Parses query text with the promql-parser crate and lowers its AST into
//! the closed grammar of [`super::ast`], which is what the sharding engine
//! rewrites.

use std::time::{SystemTime, UNIX_EPOCH};

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::{
    self, AtModifier as PromAtModifier, Expr as PromExpr, LabelModifier as PromLabelModifier,
    Offset as PromOffset, VectorMatchCardinality as PromCardinality,
    VectorSelector as PromVectorSelector,
};

use super::ast::{
    AggregateExpr, AggregationOp, AtModifier, BinModifier, BinaryExpr, BinaryOp, Call, Expr,
    LabelMatcher, LabelModifier, MatcherOp, MatrixSelector, Offset, ParenExpr, SubqueryExpr,
    UnaryExpr, VectorMatchCardinality, VectorMatching, VectorSelector,
};
use super::error::PromQLError;

/// Parse a PromQL query string into an AST expression
///
/// # Arguments
/// * `query` - The PromQL query string to parse
///
/// # Returns
/// The parsed expression AST, or a parse error
///
/// # Examples
/// ```ignore
/// use querier::query::promql::parser::parse;
///
/// let expr = parse("http_requests_total{job=\"api\"}").unwrap();
/// let expr = parse("sum by (job)(rate(http_requests_total[5m]))").unwrap();
/// ```
pub fn parse(query: &str) -> Result<Expr, PromQLError> {
    let expr = parser::parse(query).map_err(|e| PromQLError::ParseError(e.to_string()))?;
    lower(&expr)
}

/// Check if a query string is syntactically valid and can be sharded
pub fn validate(query: &str) -> Result<(), PromQLError> {
    parse(query).map(|_| ())
}

fn lower(expr: &PromExpr) -> Result<Expr, PromQLError> {
    let lowered = match expr {
        PromExpr::Aggregate(agg) => Expr::Aggregate(AggregateExpr {
            op: agg
                .op
                .to_string()
                .parse::<AggregationOp>()
                .map_err(PromQLError::UnsupportedFeature)?,
            expr: Box::new(lower(&agg.expr)?),
            param: agg.param.as_deref().map(lower).transpose()?.map(Box::new),
            modifier: agg.modifier.as_ref().map(|m| match m {
                PromLabelModifier::Include(labels) => LabelModifier::By(labels.labels.clone()),
                PromLabelModifier::Exclude(labels) => LabelModifier::Without(labels.labels.clone()),
            }),
        }),
        PromExpr::Unary(unary) => Expr::Unary(UnaryExpr {
            expr: Box::new(lower(&unary.expr)?),
        }),
        PromExpr::Binary(bin) => Expr::Binary(BinaryExpr {
            op: bin
                .op
                .to_string()
                .parse::<BinaryOp>()
                .map_err(PromQLError::UnsupportedFeature)?,
            lhs: Box::new(lower(&bin.lhs)?),
            rhs: Box::new(lower(&bin.rhs)?),
            modifier: bin.modifier.as_ref().map(|m| BinModifier {
                card: match &m.card {
                    PromCardinality::OneToOne => VectorMatchCardinality::OneToOne,
                    PromCardinality::ManyToOne(labels) => {
                        VectorMatchCardinality::ManyToOne(labels.labels.clone())
                    }
                    PromCardinality::OneToMany(labels) => {
                        VectorMatchCardinality::OneToMany(labels.labels.clone())
                    }
                    PromCardinality::ManyToMany => VectorMatchCardinality::ManyToMany,
                },
                matching: m.matching.as_ref().map(|matching| match matching {
                    PromLabelModifier::Include(labels) => VectorMatching::On(labels.labels.clone()),
                    PromLabelModifier::Exclude(labels) => {
                        VectorMatching::Ignoring(labels.labels.clone())
                    }
                }),
                return_bool: bin.return_bool(),
            }),
        }),
        PromExpr::Paren(paren) => Expr::Paren(ParenExpr {
            expr: Box::new(lower(&paren.expr)?),
        }),
        PromExpr::Subquery(sq) => Expr::Subquery(SubqueryExpr {
            expr: Box::new(lower(&sq.expr)?),
            range: sq.range,
            step: sq.step,
            offset: sq.offset.as_ref().map(lower_offset),
            at: sq.at.as_ref().map(lower_at),
        }),
        PromExpr::NumberLiteral(lit) => Expr::NumberLiteral(lit.val),
        PromExpr::StringLiteral(lit) => Expr::StringLiteral(lit.val.clone()),
        PromExpr::VectorSelector(vs) => Expr::VectorSelector(lower_selector(vs)?),
        PromExpr::MatrixSelector(ms) => Expr::MatrixSelector(MatrixSelector {
            selector: Box::new(Expr::VectorSelector(lower_selector(&ms.vs)?)),
            range: ms.range,
        }),
        PromExpr::Call(call) => Expr::Call(Call {
            func: call.func.name.to_string(),
            args: call
                .args
                .args
                .iter()
                .map(|arg| lower(arg))
                .collect::<Result<Vec<_>, _>>()?,
        }),
        PromExpr::Extension(_) => {
            return Err(PromQLError::UnsupportedFeature(
                "extension expressions".to_string(),
            ));
        }
    };
    Ok(lowered)
}

fn lower_selector(vs: &PromVectorSelector) -> Result<VectorSelector, PromQLError> {
    if !vs.matchers.or_matchers.is_empty() {
        return Err(PromQLError::InvalidMatcher(
            "`or` between label matchers cannot be sharded".to_string(),
        ));
    }

    Ok(VectorSelector {
        name: vs.name.clone(),
        matchers: vs.matchers.matchers.iter().map(convert_matcher).collect(),
        offset: vs.offset.as_ref().map(lower_offset),
        at: vs.at.as_ref().map(lower_at),
    })
}

fn lower_offset(offset: &PromOffset) -> Offset {
    match offset {
        PromOffset::Pos(d) => Offset::Pos(*d),
        PromOffset::Neg(d) => Offset::Neg(*d),
    }
}

fn lower_at(at: &PromAtModifier) -> AtModifier {
    match at {
        PromAtModifier::Start => AtModifier::Start,
        PromAtModifier::End => AtModifier::End,
        PromAtModifier::At(time) => AtModifier::At(unix_millis(*time)),
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

fn convert_matcher(matcher: &Matcher) -> LabelMatcher {
    let op = match &matcher.op {
        MatchOp::Equal => MatcherOp::Equal,
        MatchOp::NotEqual => MatcherOp::NotEqual,
        MatchOp::Re(_) => MatcherOp::RegexMatch,
        MatchOp::NotRe(_) => MatcherOp::RegexNotMatch,
    };

    LabelMatcher {
        name: matcher.name.clone(),
        op,
        value: matcher.value.clone(),
    }
}

/// Extract label matchers from a parsed expression
///
/// This is useful for understanding what labels a query is filtering on,
/// e.g. to check which legs of a sharded query carry a shard matcher.
pub fn extract_matchers(expr: &Expr) -> Vec<LabelMatcher> {
    let mut result = Vec::new();
    collect_selectors(expr, &mut |vs| result.extend(vs.matchers.iter().cloned()));
    result
}

/// Extract all metric names referenced in an expression
pub fn extract_metric_names(expr: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    collect_selectors(expr, &mut |vs| {
        if let Some(name) = metric_name(vs) {
            names.push(name.to_string());
        }
    });
    names
}

/// Extract the metric name from a vector selector
///
/// Returns `None` if the selector has neither a name nor an exact
/// `__name__` matcher.
pub fn metric_name(vs: &VectorSelector) -> Option<&str> {
    vs.name.as_deref().or_else(|| {
        vs.matchers
            .iter()
            .find(|m| m.name == "__name__" && m.op == MatcherOp::Equal)
            .map(|m| m.value.as_str())
    })
}

fn collect_selectors(expr: &Expr, visit: &mut dyn FnMut(&VectorSelector)) {
    match expr {
        Expr::VectorSelector(vs) => visit(vs),
        Expr::MatrixSelector(ms) => collect_selectors(&ms.selector, visit),
        Expr::Call(call) => {
            for arg in &call.args {
                collect_selectors(arg, visit);
            }
        }
        Expr::Aggregate(agg) => {
            if let Some(param) = &agg.param {
                collect_selectors(param, visit);
            }
            collect_selectors(&agg.expr, visit);
        }
        Expr::Binary(bin) => {
            collect_selectors(&bin.lhs, visit);
            collect_selectors(&bin.rhs, visit);
        }
        Expr::Paren(paren) => collect_selectors(&paren.expr, visit),
        Expr::Unary(unary) => collect_selectors(&unary.expr, visit),
        Expr::Subquery(sq) => collect_selectors(&sq.expr, visit),
        Expr::Extension(_) | Expr::NumberLiteral(_) | Expr::StringLiteral(_) => {}
    }
}

/// Check if an expression contains a range vector (matrix selector)
///
/// Range vectors are required for functions like rate(), irate(), etc.
pub fn has_range_vector(expr: &Expr) -> bool {
    match expr {
        Expr::MatrixSelector(_) => true,
        Expr::Call(call) => call.args.iter().any(has_range_vector),
        Expr::Aggregate(agg) => has_range_vector(&agg.expr),
        Expr::Binary(bin) => has_range_vector(&bin.lhs) || has_range_vector(&bin.rhs),
        Expr::Paren(paren) => has_range_vector(&paren.expr),
        Expr::Unary(unary) => has_range_vector(&unary.expr),
        Expr::Subquery(sq) => has_range_vector(&sq.expr),
        _ => false,
    }
}
