pub mod types;
pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use types::{
    EvaluationSummary, ExecutionRequest, Question, RawExecutionResult, Testcase,
    TestcaseResult, TestStatus, Visibility,
};
pub use config::EngineConfig;
pub use error::EngineError;
