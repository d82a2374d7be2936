/*!
# Error Handling

Error types shared across the search engine. Configuration-time failures
(bad content patterns, unparsable condition expressions) are fatal and
surfaced before any record is processed; runtime failures during condition
evaluation abort the run. Schema-text problems are deliberately *not*
errors: a malformed definition degrades to an empty schema and is logged.

All variants carry enough context to report the failure without the caller
reconstructing it: the offending pattern or expression text, and a position
where one is known.
*/

use std::fmt;

/// Errors raised by pattern compilation, condition handling and the
/// search loop's collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum GrepError {
    /// A content pattern or field-path glob failed to compile.
    PatternError {
        /// Human-readable error message
        message: String,
        /// The pattern text as configured
        pattern: String,
    },

    /// A condition expression failed to parse.
    ConditionParse {
        /// Human-readable error message
        message: String,
        /// The expression text as configured
        expression: String,
        /// Character position in the expression where the error occurred
        position: Option<usize>,
    },

    /// A condition expression failed at evaluation time for a reason other
    /// than missing channel history.
    ConditionError {
        /// Human-readable error message
        message: String,
        /// The expression text as configured
        expression: String,
    },

    /// The upstream source reported a failure.
    SourceError {
        /// Human-readable error message
        message: String,
    },

    /// The downstream sink reported a failure.
    SinkError {
        /// Human-readable error message
        message: String,
    },
}

impl GrepError {
    /// Create a pattern compilation error.
    pub fn pattern_error(message: impl Into<String>, pattern: impl Into<String>) -> Self {
        GrepError::PatternError {
            message: message.into(),
            pattern: pattern.into(),
        }
    }

    /// Create a condition parse error with optional position information.
    pub fn condition_parse(
        message: impl Into<String>,
        expression: impl Into<String>,
        position: Option<usize>,
    ) -> Self {
        GrepError::ConditionParse {
            message: message.into(),
            expression: expression.into(),
            position,
        }
    }

    /// Create a condition evaluation error.
    pub fn condition_error(message: impl Into<String>, expression: impl Into<String>) -> Self {
        GrepError::ConditionError {
            message: message.into(),
            expression: expression.into(),
        }
    }

    /// Create a source error.
    pub fn source_error(message: impl Into<String>) -> Self {
        GrepError::SourceError {
            message: message.into(),
        }
    }

    /// Create a sink error.
    pub fn sink_error(message: impl Into<String>) -> Self {
        GrepError::SinkError {
            message: message.into(),
        }
    }
}

impl fmt::Display for GrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrepError::PatternError { message, pattern } => {
                write!(f, "Pattern error in {:?}: {}", pattern, message)
            }
            GrepError::ConditionParse {
                message,
                expression,
                position,
            } => match position {
                Some(pos) => write!(
                    f,
                    "Condition parse error at position {} in {:?}: {}",
                    pos, expression, message
                ),
                None => write!(f, "Condition parse error in {:?}: {}", expression, message),
            },
            GrepError::ConditionError {
                message,
                expression,
            } => write!(
                f,
                "Error evaluating condition {:?}: {}",
                expression, message
            ),
            GrepError::SourceError { message } => write!(f, "Source error: {}", message),
            GrepError::SinkError { message } => write!(f, "Sink error: {}", message),
        }
    }
}

impl std::error::Error for GrepError {}

/// Result type for search operations.
pub type GrepResult<T> = Result<T, GrepError>;
