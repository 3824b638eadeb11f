//! Error types for the tag query pipeline

use thiserror::Error;

use crate::query::Group;

/// Result type alias for parse operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Errors surfaced to the caller.
///
/// Only structural and quota problems (plus the one privilege check) raise.
/// Bad values for well-formed metatags degrade to non-matching clauses.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A `( ` without its ` )`, or a ` )` with nothing open
    #[error("Unclosed group: every '( ' needs a matching ' )'")]
    UnclosedGroup,

    /// Parenthesized groups nested deeper than allowed
    #[error("You cannot nest groups more than {max} levels deep")]
    MaxGroupDepthExceeded { max: usize },

    /// One group held more counted tokens than allowed
    #[error("You cannot search for more than {max} tags in a single group")]
    MaxTokensInGroupExceeded { max: u32 },

    /// The whole tree holds more counted tags than the caller's quota.
    ///
    /// The partially built tree rides along so callers can report how far
    /// over the limit the query is.
    #[error("You cannot search for more than {limit} tags at a time")]
    CountExceeded {
        count: u32,
        limit: u32,
        tree: Box<Group>,
    },

    /// A metatag value names a resource the caller may not view
    #[error("Access denied: {0}")]
    PrivilegeError(String),
}

impl QueryError {
    /// Returns the error type string (for JSON responses)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::UnclosedGroup => "UNCLOSED_GROUP",
            Self::MaxGroupDepthExceeded { .. } => "MAX_GROUP_DEPTH_EXCEEDED",
            Self::MaxTokensInGroupExceeded { .. } => "MAX_TOKENS_IN_GROUP_EXCEEDED",
            Self::CountExceeded { .. } => "TAG_COUNT_EXCEEDED",
            Self::PrivilegeError(_) => "PRIVILEGE_ERROR",
        }
    }

    /// How many counted tags the query carries beyond the limit, if that is
    /// what went wrong.
    #[must_use]
    pub const fn over_limit_by(&self) -> Option<u32> {
        match self {
            Self::CountExceeded { count, limit, .. } => Some(count.saturating_sub(*limit)),
            _ => None,
        }
    }
}
