#[allow(unused_imports)]
pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
pub use anyhow::{Error, Result};

use crate::process::ProcessError;

pub type CaseResult<T = ()> = std::result::Result<T, CaseError>;

/// Why a test phase did not pass.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// An assertion was not met.
    #[error("{0}")]
    Failure(String),

    /// Anything unexpected: I/O trouble, a broken fixture, a panic.
    #[error(transparent)]
    Error(#[from] anyhow::Error),
}

impl CaseError {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Message as shown in reports.
    pub fn message(&self) -> String {
        match self {
            Self::Failure(msg) => msg.clone(),
            Self::Error(e) => format!("{:#}", e),
        }
    }
}

impl From<std::io::Error> for CaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Error(e.into())
    }
}

impl From<ProcessError> for CaseError {
    fn from(e: ProcessError) -> Self {
        Self::Error(e.into())
    }
}

impl From<fsutil::Error> for CaseError {
    fn from(e: fsutil::Error) -> Self {
        Self::Error(e.into())
    }
}

/// Defects in how a suite declares its marks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarksConfigError {
    #[error("Category '{category}' cannot have both category marks and individual test marks (test {test})")]
    MixedCategory { category: String, test: String },

    #[error("Differing total marks for category '{category}' ({first} vs {second}, test {test})")]
    DifferingPool {
        category: String,
        first: f64,
        second: f64,
        test: String,
    },

    #[error("Negative mark {mark} declared by test {test}")]
    NegativeMark { mark: f64, test: String },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_errors_become_case_errors() {
        fn open() -> CaseResult<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here")?)
        }
        let err = open().unwrap_err();
        assert!(!err.is_failure());
    }

    #[test]
    fn failure_message_is_verbatim() {
        let err = CaseError::failure("stdout mismatch");
        assert!(err.is_failure());
        assert_eq!(err.message(), "stdout mismatch");
        assert_eq!(err.to_string(), "stdout mismatch");
    }
}
