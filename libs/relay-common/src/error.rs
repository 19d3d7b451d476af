//! Batch-level error taxonomy.
//!
//! Per-testcase failures (compile errors, runtime errors, timeouts, unreachable
//! backends) never surface here; they are recorded inside `TestcaseResult`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Language not present in the profile registry
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Known language that the question does not permit
    #[error("Language not allowed for this question: {0}")]
    LanguageNotAllowed(String),

    #[error("No testcases available")]
    NoTestcases,

    #[error("Invalid resource limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid max marks: {0}")]
    InvalidMaxMarks(f64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
