use std::fmt;

use crate::types::Range;

/// The first syntax error in a rule document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    range: Range,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, range: Range) -> Self {
        Self {
            message: message.into(),
            range,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.range.start, self.message)
    }
}

impl std::error::Error for ParseError {}
