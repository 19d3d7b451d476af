use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel written to stderr when a local execution is killed at its time limit
/// without having produced any diagnostics of its own.
pub const TIMEOUT_SENTINEL: &str = "Execution Timed Out";

/// Error recorded when a program floods stdout/stderr past the capture cap
pub const OUTPUT_LIMIT_MESSAGE: &str = "Output limit exceeded";

/// Testcase visibility as stored by the question store.
/// Hidden testcases are executed like any other; redaction happens at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Visible,
    #[default]
    Hidden,
}

/// Testcase Definition (Immutable Input)
/// Supplied by the question store, read-only to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Testcase {
    pub id: String,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Testcase {
    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible
    }
}

/// Question-like record consumed from upstream.
/// Limits are optional; the engine falls back to its configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: Option<String>,
    pub max_marks: f64,
    #[serde(default, alias = "timeLimit")]
    pub time_limit_secs: Option<u64>,
    #[serde(default, alias = "memoryLimit")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub allowed_languages: Vec<String>,
    #[serde(default)]
    pub testcases: Vec<Testcase>,
}

/// One execution of one program against one stdin.
/// Built by the coordinator per testcase, consumed by exactly one backend call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    pub stdin: String,
    pub time_limit_secs: u64,
    pub memory_limit_mb: u64,
}

/// Normalized output of a backend invocation, whichever backend produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub wall_time_ms: u64,
    pub exit_code: Option<i64>,
    pub signal: Option<String>,
    /// The compile step ran and failed; the run step never started.
    pub compile_failed: bool,
    /// Captured output hit the per-stream cap and the program was stopped.
    pub output_limit_exceeded: bool,
    /// Infrastructure failure (sandbox runtime or remote endpoint), not a program failure.
    pub backend_error: Option<String>,
}

impl RawExecutionResult {
    pub fn backend_failure(message: impl Into<String>) -> Self {
        Self {
            backend_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Non-zero exit or abnormal termination of the submitted program
    pub fn is_runtime_error(&self) -> bool {
        self.output_limit_exceeded || self.signal.is_some() || self.exit_code.is_some_and(|code| code != 0)
    }

    /// Human readable failure text for the caller.
    ///
    /// Stderr wins over synthesized messages, except for timeouts and backend
    /// failures which always carry a distinguishing prefix.
    pub fn error_message(&self) -> Option<String> {
        if let Some(ref err) = self.backend_error {
            return Some(err.clone());
        }

        let stderr = self.stderr.trim();

        if self.timed_out {
            if stderr.is_empty() || stderr == TIMEOUT_SENTINEL {
                return Some(TIMEOUT_SENTINEL.to_string());
            }
            return Some(format!("{}\n{}", TIMEOUT_SENTINEL, stderr));
        }

        if self.compile_failed {
            if stderr.is_empty() {
                return Some("Compilation failed".to_string());
            }
            return Some(stderr.to_string());
        }

        if !stderr.is_empty() {
            return Some(stderr.to_string());
        }

        if self.output_limit_exceeded {
            return Some(OUTPUT_LIMIT_MESSAGE.to_string());
        }

        if let Some(ref signal) = self.signal {
            return Some(format!("Program terminated by signal: {}", signal));
        }

        match self.exit_code {
            Some(code) if code != 0 => Some(format!("Exit code: {}", code)),
            _ => None,
        }
    }
}

/// Per-Testcase Verdict
/// Finer-grained than `passed`; distinguishes the failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    BackendUnavailable,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestStatus::Passed => "passed",
            TestStatus::WrongAnswer => "wrong_answer",
            TestStatus::CompileError => "compile_error",
            TestStatus::RuntimeError => "runtime_error",
            TestStatus::TimeLimitExceeded => "time_limit_exceeded",
            TestStatus::BackendUnavailable => "backend_unavailable",
        };
        f.write_str(label)
    }
}

/// Per-Testcase Result
/// One per testcase per run; ephemeral, never persisted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseResult {
    pub testcase_id: String,
    pub passed: bool,
    pub status: TestStatus,
    pub visibility: Visibility,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Aggregate over one batch of testcase results
///
/// ## Scoring Semantics:
/// - score = passed_tests / total_tests * max_marks (rounded to 2 decimals)
/// - average_execution_time_ms = arithmetic mean over all results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub score: f64,
    pub max_marks: f64,
    pub average_execution_time_ms: f64,
    pub evaluated_at: DateTime<Utc>,
    pub results: Vec<TestcaseResult>,
}

impl EvaluationSummary {
    /// Copy with hidden testcase detail removed.
    /// Aggregates still reflect the full batch.
    pub fn visible_only(&self) -> EvaluationSummary {
        EvaluationSummary {
            results: self
                .results
                .iter()
                .filter(|r| r.visibility == Visibility::Visible)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, visibility: Visibility, passed: bool) -> TestcaseResult {
        TestcaseResult {
            testcase_id: id.to_string(),
            passed,
            status: if passed { TestStatus::Passed } else { TestStatus::WrongAnswer },
            visibility,
            input: "1".to_string(),
            expected_output: "2".to_string(),
            actual_output: "2".to_string(),
            error: None,
            execution_time_ms: 10,
        }
    }

    #[test]
    fn test_testcase_deserialization() {
        let json = r#"{"id":"tc-1","input":"5\n","expectedOutput":"120\n","visibility":"VISIBLE"}"#;
        let tc: Testcase = serde_json::from_str(json).unwrap();

        assert_eq!(tc.id, "tc-1");
        assert_eq!(tc.expected_output, "120\n");
        assert!(tc.is_visible());
    }

    #[test]
    fn test_visibility_defaults_to_hidden() {
        let json = r#"{"id":"tc-2","input":"","expectedOutput":"x"}"#;
        let tc: Testcase = serde_json::from_str(json).unwrap();
        assert_eq!(tc.visibility, Visibility::Hidden);
    }

    #[test]
    fn test_question_accepts_legacy_limit_names() {
        let json = r#"{"maxMarks":100,"timeLimit":2,"memoryLimit":128,"testcases":[]}"#;
        let q: Question = serde_json::from_str(json).unwrap();

        assert_eq!(q.time_limit_secs, Some(2));
        assert_eq!(q.memory_limit_mb, Some(128));
        assert!(q.allowed_languages.is_empty());
    }

    #[test]
    fn test_error_message_prefers_stderr() {
        let raw = RawExecutionResult {
            stderr: "Traceback: ZeroDivisionError\n".to_string(),
            exit_code: Some(1),
            ..Default::default()
        };
        assert_eq!(raw.error_message().as_deref(), Some("Traceback: ZeroDivisionError"));
        assert!(raw.is_runtime_error());
    }

    #[test]
    fn test_error_message_from_signal_and_exit_code() {
        let signalled = RawExecutionResult {
            signal: Some("SIGKILL".to_string()),
            ..Default::default()
        };
        assert_eq!(
            signalled.error_message().as_deref(),
            Some("Program terminated by signal: SIGKILL")
        );

        let exited = RawExecutionResult {
            exit_code: Some(3),
            ..Default::default()
        };
        assert_eq!(exited.error_message().as_deref(), Some("Exit code: 3"));

        let clean = RawExecutionResult {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(clean.error_message(), None);
    }

    #[test]
    fn test_timeout_message_is_distinguishable() {
        let raw = RawExecutionResult {
            timed_out: true,
            stderr: TIMEOUT_SENTINEL.to_string(),
            ..Default::default()
        };
        assert_eq!(raw.error_message().as_deref(), Some(TIMEOUT_SENTINEL));

        let with_stderr = RawExecutionResult {
            timed_out: true,
            stderr: "partial diagnostics".to_string(),
            ..Default::default()
        };
        let msg = with_stderr.error_message().unwrap();
        assert!(msg.starts_with(TIMEOUT_SENTINEL));
        assert!(msg.contains("partial diagnostics"));
    }

    #[test]
    fn test_output_limit_counts_as_runtime_error() {
        let raw = RawExecutionResult {
            stdout: "yyyy".to_string(),
            exit_code: Some(0),
            output_limit_exceeded: true,
            ..Default::default()
        };
        assert!(raw.is_runtime_error());
        assert_eq!(raw.error_message().as_deref(), Some(OUTPUT_LIMIT_MESSAGE));
    }

    #[test]
    fn test_backend_failure_overrides_everything() {
        let raw = RawExecutionResult::backend_failure("connection refused");
        assert_eq!(raw.error_message().as_deref(), Some("connection refused"));
        assert!(!raw.is_runtime_error());
    }

    #[test]
    fn test_visible_only_keeps_aggregates() {
        let summary = EvaluationSummary {
            total_tests: 3,
            passed_tests: 2,
            score: 66.67,
            max_marks: 100.0,
            average_execution_time_ms: 10.0,
            evaluated_at: Utc::now(),
            results: vec![
                result("a", Visibility::Visible, true),
                result("b", Visibility::Hidden, true),
                result("c", Visibility::Hidden, false),
            ],
        };

        let redacted = summary.visible_only();

        assert_eq!(redacted.results.len(), 1);
        assert_eq!(redacted.results[0].testcase_id, "a");
        assert_eq!(redacted.total_tests, 3);
        assert_eq!(redacted.passed_tests, 2);
        assert_eq!(redacted.score, 66.67);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TestStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");
        assert_eq!(TestStatus::CompileError.to_string(), "compile_error");
    }
}
