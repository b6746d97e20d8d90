//! Verification helpers for commit transactions
//!
//! Provides assertion helpers over the `set`/`delete` lines a handler
//! committed.

use thiserror::Error;

use crate::mock::AppliedTransaction;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected line '{line}' not found in transaction")]
    LineNotFound { line: String },

    #[error("Unexpected line '{line}' found in transaction")]
    UnexpectedLine { line: String },

    #[error("Expected '{first}' before '{second}'")]
    OrderMismatch { first: String, second: String },

    #[error("Expected {expected} lines starting with '{prefix}', found {actual}")]
    LineCountMismatch {
        prefix: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Commit-script verification helper
pub struct ScriptVerifier {
    lines: Vec<String>,
}

impl ScriptVerifier {
    /// Create a verifier over rendered lines
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a verifier over one transaction
    pub fn for_transaction(transaction: &AppliedTransaction) -> Self {
        Self::new(transaction.lines())
    }

    fn position(&self, line: &str) -> Option<usize> {
        self.lines.iter().position(|l| l == line)
    }

    /// Verify that `line` was committed
    pub fn assert_line(&self, line: &str) -> VerifyResult<&Self> {
        match self.position(line) {
            Some(_) => Ok(self),
            None => Err(VerificationError::LineNotFound {
                line: line.to_string(),
            }),
        }
    }

    /// Verify that `line` was not committed
    pub fn assert_no_line(&self, line: &str) -> VerifyResult<&Self> {
        match self.position(line) {
            None => Ok(self),
            Some(_) => Err(VerificationError::UnexpectedLine {
                line: line.to_string(),
            }),
        }
    }

    /// Verify that `first` was committed before `second`
    pub fn assert_order(&self, first: &str, second: &str) -> VerifyResult<&Self> {
        let a = self.position(first).ok_or_else(|| VerificationError::LineNotFound {
            line: first.to_string(),
        })?;
        let b = self.position(second).ok_or_else(|| VerificationError::LineNotFound {
            line: second.to_string(),
        })?;
        if a < b {
            Ok(self)
        } else {
            Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
            })
        }
    }

    /// Verify how many lines start with `prefix`
    pub fn assert_count(&self, prefix: &str, expected: usize) -> VerifyResult<&Self> {
        let actual = self.lines.iter().filter(|l| l.starts_with(prefix)).count();
        if actual == expected {
            Ok(self)
        } else {
            Err(VerificationError::LineCountMismatch {
                prefix: prefix.to_string(),
                expected,
                actual,
            })
        }
    }

    /// Total number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if nothing was committed
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
