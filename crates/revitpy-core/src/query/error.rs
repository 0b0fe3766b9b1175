use thiserror::Error;

use super::filter::FilterOperator;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid operand for '{operator}': {reason}")]
    InvalidOperand {
        operator: FilterOperator,
        reason: String,
    },

    #[error("query returned no elements")]
    NoElements,

    #[error("query returned {count} elements, expected exactly one")]
    MultipleElements { count: usize },
}
