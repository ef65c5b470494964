//! Closed PromQL expression grammar used by the query sharding engine
//!
//! The tree is produced by [`super::parser`] and rewritten by
//! [`super::astmapper`]. Every consumer matches on [`Expr`] exhaustively, so a
//! new node kind has to be taught to the mapper, the cloner, the printer and
//! the parallelizability check together.
//!
//! `Display` renders an expression back into PromQL text. That text is what
//! per-shard legs look like on the wire, so label values and the shard
//! matcher must print byte-for-byte.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl fmt::Display for MatcherOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelMatcher {
    /// Label name
    pub name: String,
    /// Match operation
    pub op: MatcherOp,
    /// Value to match against
    pub value: String,
}

impl LabelMatcher {
    /// Create a new equality matcher
    pub fn equal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::Equal,
            value: value.to_string(),
        }
    }

    /// Create a new not-equal matcher
    pub fn not_equal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::NotEqual,
            value: value.to_string(),
        }
    }

    /// Create a new regex matcher
    pub fn regex_match(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::RegexMatch,
            value: pattern.to_string(),
        }
    }

    /// Create a new regex not-match matcher
    pub fn regex_not_match(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::RegexNotMatch,
            value: pattern.to_string(),
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Aggregation operators supported by PromQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Stdvar,
    TopK,
    BottomK,
    CountValues,
    Quantile,
    Group,
}

impl fmt::Display for AggregationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::Stddev => write!(f, "stddev"),
            Self::Stdvar => write!(f, "stdvar"),
            Self::TopK => write!(f, "topk"),
            Self::BottomK => write!(f, "bottomk"),
            Self::CountValues => write!(f, "count_values"),
            Self::Quantile => write!(f, "quantile"),
            Self::Group => write!(f, "group"),
        }
    }
}

impl FromStr for AggregationOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            "stddev" => Ok(Self::Stddev),
            "stdvar" => Ok(Self::Stdvar),
            "topk" => Ok(Self::TopK),
            "bottomk" => Ok(Self::BottomK),
            "count_values" => Ok(Self::CountValues),
            "quantile" => Ok(Self::Quantile),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown aggregation operator: {other}")),
        }
    }
}

/// Binary operators, arithmetic, comparison and set operators alike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Eql,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn is_set_operator(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Unless)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Atan2 => "atan2",
            Self::Eql => "==",
            Self::Neq => "!=",
            Self::Gtr => ">",
            Self::Lss => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        };
        f.write_str(op)
    }
}

impl FromStr for BinaryOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "+" => Ok(Self::Add),
            "-" => Ok(Self::Sub),
            "*" => Ok(Self::Mul),
            "/" => Ok(Self::Div),
            "%" => Ok(Self::Mod),
            "^" => Ok(Self::Pow),
            "atan2" => Ok(Self::Atan2),
            "==" => Ok(Self::Eql),
            "!=" => Ok(Self::Neq),
            ">" => Ok(Self::Gtr),
            "<" => Ok(Self::Lss),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "unless" => Ok(Self::Unless),
            other => Err(format!("unknown binary operator: {other}")),
        }
    }
}

/// Grouping clause of an aggregation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelModifier {
    /// `by (labels)`
    By(Vec<String>),
    /// `without (labels)`
    Without(Vec<String>),
}

impl LabelModifier {
    pub fn by<S: AsRef<str>>(labels: &[S]) -> Self {
        Self::By(labels.iter().map(|l| l.as_ref().to_string()).collect())
    }

    pub fn without<S: AsRef<str>>(labels: &[S]) -> Self {
        Self::Without(labels.iter().map(|l| l.as_ref().to_string()).collect())
    }

    pub fn labels(&self) -> &[String] {
        match self {
            Self::By(labels) | Self::Without(labels) => labels,
        }
    }
}

/// Label matching of a binary expression between two vectors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VectorMatching {
    On(Vec<String>),
    Ignoring(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VectorMatchCardinality {
    OneToOne,
    /// `group_left (labels)`
    ManyToOne(Vec<String>),
    /// `group_right (labels)`
    OneToMany(Vec<String>),
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinModifier {
    pub card: VectorMatchCardinality,
    pub matching: Option<VectorMatching>,
    pub return_bool: bool,
}

/// `offset` modifier of a selector or subquery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    Pos(Duration),
    Neg(Duration),
}

/// `@` modifier of a selector or subquery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtModifier {
    Start,
    End,
    /// Milliseconds since the Unix epoch
    At(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub op: AggregationOp,
    pub expr: Box<Expr>,
    /// Parameter of `topk`, `quantile`, `count_values`, ...
    pub param: Option<Box<Expr>>,
    /// `None` when the aggregation has no grouping clause at all
    pub modifier: Option<LabelModifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub offset: Option<Offset>,
    pub at: Option<AtModifier>,
}

impl VectorSelector {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Range selector, `selector[range]`
///
/// The grammar only produces vector selectors as the inner node, but the
/// field holds any expression so that a malformed tree can be represented
/// and rejected when it gets rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    pub selector: Box<Expr>,
    pub range: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub modifier: Option<BinModifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParenExpr {
    pub expr: Box<Expr>,
}

/// Unary minus
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub expr: Box<Expr>,
    pub range: Duration,
    pub step: Option<Duration>,
    pub offset: Option<Offset>,
    pub at: Option<AtModifier>,
}

/// A node owned by some other layer, e.g. a query engine embedding its own
/// operators into the tree. The sharding engine can carry it around but
/// cannot look inside or copy it.
pub trait ExtensionNode: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub node: Arc<dyn ExtensionNode>,
}

impl PartialEq for Extension {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.node), Arc::as_ptr(&other.node))
    }
}

/// A PromQL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Aggregate(AggregateExpr),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Binary(BinaryExpr),
    Call(Call),
    Paren(ParenExpr),
    Unary(UnaryExpr),
    Subquery(SubqueryExpr),
    NumberLiteral(f64),
    StringLiteral(String),
    Extension(Extension),
}

impl Expr {
    /// Short name of the node kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Aggregate(_) => "aggregate",
            Self::VectorSelector(_) => "vector selector",
            Self::MatrixSelector(_) => "matrix selector",
            Self::Binary(_) => "binary expression",
            Self::Call(_) => "function call",
            Self::Paren(_) => "paren expression",
            Self::Unary(_) => "unary expression",
            Self::Subquery(_) => "subquery",
            Self::NumberLiteral(_) => "number literal",
            Self::StringLiteral(_) => "string literal",
            Self::Extension(_) => "extension",
        }
    }

    pub fn aggregate(op: AggregationOp, modifier: Option<LabelModifier>, expr: Expr) -> Self {
        Self::Aggregate(AggregateExpr {
            op,
            expr: Box::new(expr),
            param: None,
            modifier,
        })
    }

    pub fn matrix(selector: VectorSelector, range: Duration) -> Self {
        Self::MatrixSelector(MatrixSelector {
            selector: Box::new(Self::VectorSelector(selector)),
            range,
        })
    }

    pub fn call(func: &str, args: Vec<Expr>) -> Self {
        Self::Call(Call {
            func: func.to_string(),
            args,
        })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            modifier: None,
        })
    }
}

impl From<VectorSelector> for Expr {
    fn from(selector: VectorSelector) -> Self {
        Self::VectorSelector(selector)
    }
}

/// Format a duration the way Prometheus does, largest units first (`1h30m`)
pub fn format_duration(d: Duration) -> String {
    const UNITS: [(&str, u128); 7] = [
        ("y", 365 * 24 * 60 * 60 * 1000),
        ("w", 7 * 24 * 60 * 60 * 1000),
        ("d", 24 * 60 * 60 * 1000),
        ("h", 60 * 60 * 1000),
        ("m", 60 * 1000),
        ("s", 1000),
        ("ms", 1),
    ];

    let mut ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in UNITS {
        let n = ms / size;
        if n > 0 {
            out.push_str(&format!("{n}{unit}"));
            ms -= n * size;
        }
    }
    out
}

fn write_labels(f: &mut fmt::Formatter<'_>, labels: &[String]) -> fmt::Result {
    write!(f, "({})", labels.join(", "))
}

fn write_modifiers(
    f: &mut fmt::Formatter<'_>,
    offset: Option<&Offset>,
    at: Option<&AtModifier>,
) -> fmt::Result {
    match offset {
        Some(Offset::Pos(d)) => write!(f, " offset {}", format_duration(*d))?,
        Some(Offset::Neg(d)) => write!(f, " offset -{}", format_duration(*d))?,
        None => {}
    }
    match at {
        Some(AtModifier::Start) => write!(f, " @ start()"),
        Some(AtModifier::End) => write!(f, " @ end()"),
        Some(AtModifier::At(ms)) => {
            let sign = if *ms < 0 { "-" } else { "" };
            let abs = ms.unsigned_abs();
            write!(f, " @ {sign}{}.{:03}", abs / 1000, abs % 1000)
        }
        None => Ok(()),
    }
}

fn write_selector_body(f: &mut fmt::Formatter<'_>, vs: &VectorSelector) -> fmt::Result {
    if let Some(name) = &vs.name {
        f.write_str(name)?;
    }
    if !vs.matchers.is_empty() || vs.name.is_none() {
        let matchers: Vec<String> = vs.matchers.iter().map(|m| m.to_string()).collect();
        write!(f, "{{{}}}", matchers.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregate(agg) => {
                write!(f, "{}", agg.op)?;
                match &agg.modifier {
                    Some(LabelModifier::Without(labels)) => {
                        f.write_str(" without ")?;
                        write_labels(f, labels)?;
                        f.write_str(" ")?;
                    }
                    Some(LabelModifier::By(labels)) if !labels.is_empty() => {
                        f.write_str(" by ")?;
                        write_labels(f, labels)?;
                        f.write_str(" ")?;
                    }
                    _ => {}
                }
                f.write_str("(")?;
                if let Some(param) = &agg.param {
                    write!(f, "{param}, ")?;
                }
                write!(f, "{})", agg.expr)
            }
            Self::VectorSelector(vs) => {
                write_selector_body(f, vs)?;
                write_modifiers(f, vs.offset.as_ref(), vs.at.as_ref())
            }
            Self::MatrixSelector(ms) => match ms.selector.as_ref() {
                Self::VectorSelector(vs) => {
                    write_selector_body(f, vs)?;
                    write!(f, "[{}]", format_duration(ms.range))?;
                    write_modifiers(f, vs.offset.as_ref(), vs.at.as_ref())
                }
                other => write!(f, "{other}[{}]", format_duration(ms.range)),
            },
            Self::Binary(bin) => {
                write!(f, "{} {}", bin.lhs, bin.op)?;
                if let Some(modifier) = &bin.modifier {
                    if modifier.return_bool {
                        f.write_str(" bool")?;
                    }
                    match &modifier.matching {
                        Some(VectorMatching::On(labels)) => {
                            f.write_str(" on ")?;
                            write_labels(f, labels)?;
                        }
                        Some(VectorMatching::Ignoring(labels)) => {
                            f.write_str(" ignoring ")?;
                            write_labels(f, labels)?;
                        }
                        None => {}
                    }
                    match &modifier.card {
                        VectorMatchCardinality::ManyToOne(labels) => {
                            f.write_str(" group_left ")?;
                            write_labels(f, labels)?;
                        }
                        VectorMatchCardinality::OneToMany(labels) => {
                            f.write_str(" group_right ")?;
                            write_labels(f, labels)?;
                        }
                        VectorMatchCardinality::OneToOne | VectorMatchCardinality::ManyToMany => {}
                    }
                }
                write!(f, " {}", bin.rhs)
            }
            Self::Call(call) => {
                let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", call.func, args.join(", "))
            }
            Self::Paren(paren) => write!(f, "({})", paren.expr),
            Self::Unary(unary) => write!(f, "-{}", unary.expr),
            Self::Subquery(sq) => {
                write!(f, "{}[{}:", sq.expr, format_duration(sq.range))?;
                if let Some(step) = sq.step {
                    f.write_str(&format_duration(step))?;
                }
                f.write_str("]")?;
                write_modifiers(f, sq.offset.as_ref(), sq.at.as_ref())
            }
            Self::NumberLiteral(val) => {
                if val.is_nan() {
                    f.write_str("NaN")
                } else if val.is_infinite() {
                    f.write_str(if *val > 0.0 { "Inf" } else { "-Inf" })
                } else {
                    write!(f, "{val}")
                }
            }
            Self::StringLiteral(val) => write!(f, "{val:?}"),
            Self::Extension(ext) => write!(f, "{}", ext.node.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests() -> VectorSelector {
        VectorSelector::new("http_requests_total").with_matcher(LabelMatcher::equal("job", "api"))
    }

    #[test]
    fn test_label_matcher_display() {
        assert_eq!(format!("{}", MatcherOp::Equal), "=");
        assert_eq!(format!("{}", MatcherOp::NotEqual), "!=");
        assert_eq!(format!("{}", MatcherOp::RegexMatch), "=~");
        assert_eq!(format!("{}", MatcherOp::RegexNotMatch), "!~");
        assert_eq!(
            LabelMatcher::regex_match("job", "api.*").to_string(),
            r#"job=~"api.*""#
        );
    }

    #[test]
    fn test_aggregation_op_display() {
        assert_eq!(format!("{}", AggregationOp::Sum), "sum");
        assert_eq!(format!("{}", AggregationOp::TopK), "topk");
        assert_eq!("count_values".parse::<AggregationOp>(), Ok(AggregationOp::CountValues));
        assert!("median".parse::<AggregationOp>().is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_display_selectors() {
        let vs = Expr::from(requests());
        assert_eq!(vs.to_string(), r#"http_requests_total{job="api"}"#);

        let ms = Expr::matrix(
            requests().with_offset(Offset::Pos(Duration::from_secs(60))),
            Duration::from_secs(300),
        );
        assert_eq!(ms.to_string(), r#"http_requests_total{job="api"}[5m] offset 1m"#);

        let anonymous = Expr::from(VectorSelector::default());
        assert_eq!(anonymous.to_string(), "{}");
    }

    #[test]
    fn test_display_aggregations() {
        let rate = Expr::call(
            "rate",
            vec![Expr::matrix(requests(), Duration::from_secs(300))],
        );

        let plain = Expr::aggregate(AggregationOp::Sum, None, rate.clone());
        assert_eq!(plain.to_string(), r#"sum(rate(http_requests_total{job="api"}[5m]))"#);

        let by = Expr::aggregate(AggregationOp::Sum, Some(LabelModifier::by(&["job"])), rate.clone());
        assert_eq!(
            by.to_string(),
            r#"sum by (job) (rate(http_requests_total{job="api"}[5m]))"#
        );

        let without = Expr::aggregate(AggregationOp::Sum, Some(LabelModifier::Without(vec![])), rate.clone());
        assert_eq!(
            without.to_string(),
            r#"sum without () (rate(http_requests_total{job="api"}[5m]))"#
        );

        let topk = Expr::Aggregate(AggregateExpr {
            op: AggregationOp::TopK,
            expr: Box::new(rate),
            param: Some(Box::new(Expr::NumberLiteral(3.0))),
            modifier: None,
        });
        assert_eq!(
            topk.to_string(),
            r#"topk(3, rate(http_requests_total{job="api"}[5m]))"#
        );
    }

    #[test]
    fn test_display_binary_and_subquery() {
        let bin = Expr::Binary(BinaryExpr {
            op: BinaryOp::Gtr,
            lhs: Box::new(Expr::from(VectorSelector::new("a"))),
            rhs: Box::new(Expr::from(VectorSelector::new("b"))),
            modifier: Some(BinModifier {
                card: VectorMatchCardinality::ManyToOne(vec!["team".to_string()]),
                matching: Some(VectorMatching::On(vec!["job".to_string()])),
                return_bool: true,
            }),
        });
        assert_eq!(bin.to_string(), "a > bool on (job) group_left (team) b");

        let sq = Expr::Subquery(SubqueryExpr {
            expr: Box::new(Expr::from(VectorSelector::new("a"))),
            range: Duration::from_secs(1800),
            step: None,
            offset: None,
            at: Some(AtModifier::At(1_609_459_200_000)),
        });
        assert_eq!(sq.to_string(), "a[30m:] @ 1609459200.000");
    }

    #[test]
    fn test_extension_equality_is_identity() {
        #[derive(Debug)]
        struct Opaque;
        impl ExtensionNode for Opaque {
            fn name(&self) -> &str {
                "opaque"
            }
        }

        let node: Arc<dyn ExtensionNode> = Arc::new(Opaque);
        let a = Expr::Extension(Extension { node: node.clone() });
        let b = Expr::Extension(Extension { node });
        let c = Expr::Extension(Extension {
            node: Arc::new(Opaque),
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.kind(), "extension");
    }
}
