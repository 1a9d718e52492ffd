//! Entity cache and query errors.

use thiserror::Error;

use dispatcher_core::ClientError;

/// Query failure.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Rule is not a `[field, op, value(, conversion)]` or `[logic, rules]`
    /// tuple.
    #[error("malformed rule {rule}: {reason}")]
    MalformedRule {
        /// The offending rule, as JSON.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Unknown field or logic operator.
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    /// Unknown literal conversion.
    #[error("unknown conversion {0:?}")]
    UnknownConversion(String),

    /// Literal could not be converted.
    #[error("cannot convert {value} with {conversion}")]
    Conversion {
        /// The literal, as JSON.
        value: String,
        /// Conversion name.
        conversion: &'static str,
    },

    /// `~` pattern does not compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },

    /// Options object could not be read.
    #[error("invalid query options: {0}")]
    InvalidOptions(String),

    /// Remote query failed.
    #[error("remote query failed: {0}")]
    Remote(#[from] ClientError),
}

/// Malformed collection change event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeError {
    /// Event payload has the wrong shape.
    #[error("malformed change event: {0}")]
    Malformed(String),

    /// `action` is not create, update, or delete.
    #[error("unknown change action {0:?}")]
    UnknownAction(String),
}

/// Result alias for queries.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            QueryError::UnknownOperator("<>".into()).to_string(),
            "unknown operator \"<>\""
        );
        assert_eq!(
            ChangeError::UnknownAction("move".into()).to_string(),
            "unknown change action \"move\""
        );
    }

    #[test]
    fn remote_from_client_error() {
        let err: QueryError = ClientError::NotConnected.into();
        assert!(matches!(err, QueryError::Remote(ClientError::NotConnected)));
        assert_eq!(err.to_string(), "remote query failed: not connected");
    }
}
