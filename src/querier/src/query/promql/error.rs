//! PromQL-specific error types

use std::fmt;

/// Errors that can occur while parsing a PromQL query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromQLError {
    /// Error parsing the PromQL query syntax
    ParseError(String),
    /// Unsupported PromQL feature
    UnsupportedFeature(String),
    /// Invalid label matcher
    InvalidMatcher(String),
}

impl std::error::Error for PromQLError {}

impl fmt::Display for PromQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "PromQL parse error: {msg}"),
            Self::UnsupportedFeature(feature) => {
                write!(f, "Unsupported PromQL feature: {feature}")
            }
            Self::InvalidMatcher(msg) => write!(f, "Invalid label matcher: {msg}"),
        }
    }
}

impl From<PromQLError> for super::super::error::QuerierError {
    fn from(err: PromQLError) -> Self {
        super::super::error::QuerierError::InvalidInput(err.to_string())
    }
}
