//! Shard annotation codec
//!
//! Per-shard legs carry a reserved equality matcher
//! `__query_shard__="<shard>_of_<of>"`. Backends match on the exact label
//! name and value text, so both are part of the wire format.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{AstMapperError, Result};
use crate::query::promql::ast::{LabelMatcher, MatcherOp};

/// Reserved label referencing a query shard
pub const SHARD_LABEL: &str = "__query_shard__";

static SHARD_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+_of_[0-9]+$").expect("shard label pattern is valid"));

/// Shard position decoded from (or encoded into) a shard label value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardAnnotation {
    pub shard: usize,
    pub of: usize,
}

impl ShardAnnotation {
    pub fn new(shard: usize, of: usize) -> Result<Self> {
        if shard >= of {
            return Err(AstMapperError::ShardOutOfBounds { shard, of });
        }
        Ok(Self { shard, of })
    }

    /// The annotation as a `(name, value)` label pair
    pub fn label(&self) -> (&'static str, String) {
        (SHARD_LABEL, self.to_string())
    }

    /// The equality matcher pinning a selector to this shard
    pub fn matcher(&self) -> LabelMatcher {
        LabelMatcher::equal(SHARD_LABEL, &self.to_string())
    }
}

impl fmt::Display for ShardAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.shard, self.of))
    }
}

impl FromStr for ShardAnnotation {
    type Err = AstMapperError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

/// Encode a shard position as a label value
pub fn encode(shard: usize, of: usize) -> String {
    format!("{shard}_of_{of}")
}

/// Decode a label value produced by [`encode`]
pub fn decode(input: &str) -> Result<ShardAnnotation> {
    if !SHARD_LABEL_RE.is_match(input) {
        return Err(AstMapperError::Decode(format!("[{input}]")));
    }

    let (shard, of) = input
        .split_once("_of_")
        .ok_or_else(|| AstMapperError::Decode(format!("[{input}]")))?;
    let shard = shard
        .parse::<usize>()
        .map_err(|e| AstMapperError::Decode(format!("[{input}]: {e}")))?;
    let of = of
        .parse::<usize>()
        .map_err(|e| AstMapperError::Decode(format!("[{input}]: {e}")))?;

    ShardAnnotation::new(shard, of)
}

/// Find the shard annotation in a matcher list
///
/// Returns the annotation of the first equality matcher on [`SHARD_LABEL`]
/// together with its position, or `None` when the list is not sharded.
pub fn find_shard_matcher(matchers: &[LabelMatcher]) -> Result<Option<(ShardAnnotation, usize)>> {
    for (idx, matcher) in matchers.iter().enumerate() {
        if matcher.name == SHARD_LABEL && matcher.op == MatcherOp::Equal {
            let shard = decode(&matcher.value)?;
            return Ok(Some((shard, idx)));
        }
    }
    Ok(None)
}
