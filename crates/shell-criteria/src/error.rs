//! Error types for criteria parsing and evaluation

use thiserror::Error;

/// Errors raised while parsing or evaluating criteria
#[derive(Error, Debug)]
pub enum Error {
    /// The tokenizer met input that does not fit the grammar at this position
    #[error("illegal token at {index}, expected {expected}")]
    IllegalToken {
        /// Byte offset of the offending token within the expression
        index: usize,
        /// Human readable description of what the parser expected
        expected: String,
    },

    /// A comparison could not be evaluated
    #[error("failed to evaluate '{criterion}': {reason}")]
    Evaluation {
        /// Display form of the comparison that failed
        criterion: String,
        /// Why the comparison failed
        reason: String,
    },

    /// A `~/regex/` right operand did not compile
    #[error("invalid regular expression '{expression}': {source}")]
    InvalidRegex {
        /// The expression as written
        expression: String,
        /// Underlying compile error
        #[source]
        source: regex::Error,
    },
}

impl Error {
    /// Create an illegal token error
    pub fn illegal_token(index: usize, expected: impl Into<String>) -> Self {
        Self::IllegalToken {
            index,
            expected: expected.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(criterion: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            criterion: criterion.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
