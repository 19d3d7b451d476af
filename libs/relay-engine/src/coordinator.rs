/// Execution Coordinator - High-Level Orchestration
///
/// **Responsibility:**
/// Run one submission against a list of testcases through exactly one backend.
///
/// **Architecture:**
/// 1. Resolve the language profile (rejects before any resource is allocated)
/// 2. Execute every testcase through the configured backend, bounded parallelism
/// 3. Compare trimmed outputs, absorbing every per-testcase failure
/// 4. Hand the ordered results to the scorer
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (backend's job)
/// - How scores are computed (scorer's job)

use crate::backend::{Backend, ExecutionBackend};
use crate::languages::{LanguageProfile, LanguageRegistry};
use crate::scorer;
use anyhow::Context;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use relay_common::config::{MAX_MEMORY_LIMIT_MB, MAX_TIME_LIMIT_SECS};
use relay_common::error::EngineResult;
use relay_common::{
    EngineConfig, EngineError, EvaluationSummary, ExecutionRequest, Question, RawExecutionResult,
    Testcase, TestcaseResult, TestStatus, Visibility,
};
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

/// Id given to the ad-hoc testcase built from custom probe input
pub const CUSTOM_TESTCASE_ID: &str = "custom";

/// Which testcases a probe ("run") request executes
#[derive(Debug, Clone)]
pub enum ProbeSelection {
    /// Every VISIBLE testcase of the question
    Visible,
    /// One ad-hoc testcase; the expected output comes from the caller only
    Custom {
        input: String,
        expected_output: Option<String>,
    },
}

/// Normalize output string for comparison
///
/// Trims leading/trailing whitespace (which also absorbs `\r\n` vs `\n` at the
/// ends); internal whitespace and case are preserved.
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

pub struct Coordinator<B = Backend> {
    backend: B,
    registry: LanguageRegistry,
    default_time_limit_secs: u64,
    default_memory_limit_mb: u64,
    max_parallel_testcases: usize,
}

impl Coordinator<Backend> {
    /// Production wiring: registry from file or built-in table, backend by config
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let registry = match config.languages_file {
            Some(ref path) => LanguageRegistry::load(path)?,
            None => LanguageRegistry::builtin()?,
        };

        let backend = Backend::from_config(config).context("Failed to initialize execution backend")?;

        info!(
            backend = backend.kind(),
            languages = ?registry.list_languages(),
            max_parallel_testcases = config.max_parallel_testcases,
            "Execution coordinator ready"
        );

        Ok(Self::new(backend, registry, config))
    }
}

impl<B: ExecutionBackend> Coordinator<B> {
    pub fn new(backend: B, registry: LanguageRegistry, config: &EngineConfig) -> Self {
        Self {
            backend,
            registry,
            default_time_limit_secs: config.default_time_limit_secs,
            default_memory_limit_mb: config.default_memory_limit_mb,
            max_parallel_testcases: config.max_parallel_testcases.max(1),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Run `code` against every testcase, returning one result per testcase in
    /// input order. Only batch-level problems (unknown language, no testcases,
    /// out-of-range limits) are errors; everything else lands in a `TestcaseResult`.
    #[tracing::instrument(
        skip(self, code, testcases),
        fields(backend = self.backend.kind(), testcase_count = testcases.len())
    )]
    pub async fn run_testcases(
        &self,
        code: &str,
        language: &str,
        testcases: &[Testcase],
        time_limit_secs: u64,
        memory_limit_mb: u64,
    ) -> EngineResult<Vec<TestcaseResult>> {
        // Must run first: unsupported languages never touch filesystem or network
        let profile = self.registry.resolve(language)?;

        if testcases.is_empty() {
            return Err(EngineError::NoTestcases);
        }
        check_limits(time_limit_secs, memory_limit_mb)?;

        info!(
            language = %profile.name,
            time_limit_secs,
            memory_limit_mb,
            "Starting testcase batch"
        );

        let results: Vec<TestcaseResult> = stream::iter(testcases.iter().map(|testcase| {
            self.run_one(code, profile, testcase, time_limit_secs, memory_limit_mb)
        }))
        .buffered(self.max_parallel_testcases)
        .collect()
        .await;

        let passed = results.iter().filter(|r| r.passed).count();
        info!(
            language = %profile.name,
            passed,
            total = results.len(),
            "Testcase batch complete"
        );

        Ok(results)
    }

    /// Probe mode ("run"): caller-selected testcases, full detail returned
    pub async fn probe(
        &self,
        question: &Question,
        language: &str,
        code: &str,
        selection: ProbeSelection,
    ) -> EngineResult<EvaluationSummary> {
        self.check_language(question, language)?;

        let testcases: Vec<Testcase> = match selection {
            ProbeSelection::Visible => question
                .testcases
                .iter()
                .filter(|tc| tc.is_visible())
                .cloned()
                .collect(),
            ProbeSelection::Custom { input, expected_output } => vec![Testcase {
                id: CUSTOM_TESTCASE_ID.to_string(),
                input,
                expected_output: expected_output.unwrap_or_default(),
                visibility: Visibility::Visible,
            }],
        };

        self.evaluate(question, language, code, &testcases).await
    }

    /// Grading mode ("submit"): every testcase, hidden ones included.
    /// Redaction is the caller's job (`EvaluationSummary::visible_only`).
    pub async fn grade(&self, question: &Question, language: &str, code: &str) -> EngineResult<EvaluationSummary> {
        self.check_language(question, language)?;
        self.evaluate(question, language, code, &question.testcases).await
    }

    async fn evaluate(
        &self,
        question: &Question,
        language: &str,
        code: &str,
        testcases: &[Testcase],
    ) -> EngineResult<EvaluationSummary> {
        let (time_limit_secs, memory_limit_mb) = self.resolve_limits(question);
        let results = self
            .run_testcases(code, language, testcases, time_limit_secs, memory_limit_mb)
            .await?;
        scorer::summarize(results, question.max_marks)
    }

    /// Question limits win; configuration supplies the fallbacks
    pub fn resolve_limits(&self, question: &Question) -> (u64, u64) {
        (
            question.time_limit_secs.unwrap_or(self.default_time_limit_secs),
            question.memory_limit_mb.unwrap_or(self.default_memory_limit_mb),
        )
    }

    fn check_language(&self, question: &Question, language: &str) -> EngineResult<()> {
        let profile = self.registry.resolve(language)?;

        if question.allowed_languages.is_empty() {
            return Ok(());
        }

        let allowed = question.allowed_languages.iter().any(|entry| match self.registry.resolve(entry) {
            Ok(p) => p.name == profile.name,
            Err(_) => entry.trim().eq_ignore_ascii_case(&profile.name),
        });

        if allowed {
            Ok(())
        } else {
            Err(EngineError::LanguageNotAllowed(language.to_string()))
        }
    }

    async fn run_one(
        &self,
        code: &str,
        profile: &LanguageProfile,
        testcase: &Testcase,
        time_limit_secs: u64,
        memory_limit_mb: u64,
    ) -> TestcaseResult {
        let request = ExecutionRequest {
            code: code.to_string(),
            language: profile.name.clone(),
            stdin: testcase.input.clone(),
            time_limit_secs,
            memory_limit_mb,
        };

        let outcome = AssertUnwindSafe(self.backend.execute(&request, profile))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(raw) => judge(testcase, raw),
            Err(_) => {
                warn!(testcase_id = %testcase.id, "Backend panicked during execution");
                failed_result(testcase, "Internal execution error".to_string())
            }
        };

        debug!(
            testcase_id = %result.testcase_id,
            status = %result.status,
            execution_time_ms = result.execution_time_ms,
            "Testcase result"
        );

        result
    }
}

/// Turn a raw backend result into a testcase verdict
fn judge(testcase: &Testcase, raw: RawExecutionResult) -> TestcaseResult {
    if let Some(message) = raw.backend_error {
        warn!(testcase_id = %testcase.id, error = %message, "Backend failure");
        return failed_result(testcase, message);
    }

    let error = raw.error_message();
    let matches = normalize_output(&raw.stdout) == normalize_output(&testcase.expected_output);
    let passed = matches && !raw.timed_out && !raw.compile_failed && !raw.output_limit_exceeded;

    let status = if raw.timed_out {
        TestStatus::TimeLimitExceeded
    } else if raw.compile_failed {
        TestStatus::CompileError
    } else if passed {
        TestStatus::Passed
    } else if raw.is_runtime_error() {
        TestStatus::RuntimeError
    } else {
        TestStatus::WrongAnswer
    };

    TestcaseResult {
        testcase_id: testcase.id.clone(),
        passed,
        status,
        visibility: testcase.visibility,
        input: testcase.input.clone(),
        expected_output: testcase.expected_output.clone(),
        actual_output: raw.stdout,
        error,
        execution_time_ms: raw.wall_time_ms,
    }
}

fn failed_result(testcase: &Testcase, message: String) -> TestcaseResult {
    TestcaseResult {
        testcase_id: testcase.id.clone(),
        passed: false,
        status: TestStatus::BackendUnavailable,
        visibility: testcase.visibility,
        input: testcase.input.clone(),
        expected_output: testcase.expected_output.clone(),
        actual_output: String::new(),
        error: Some(message),
        execution_time_ms: 0,
    }
}

/// Limits must be non-zero and within what a sandbox can honour
pub fn check_limits(time_limit_secs: u64, memory_limit_mb: u64) -> EngineResult<()> {
    check_time_limit(time_limit_secs)?;
    check_memory_limit(memory_limit_mb)
}

fn check_time_limit(secs: u64) -> EngineResult<()> {
    if secs == 0 {
        return Err(EngineError::InvalidLimits("time limit must be at least 1 second".to_string()));
    }
    if secs > MAX_TIME_LIMIT_SECS {
        return Err(EngineError::InvalidLimits(format!(
            "time limit of {}s exceeds the maximum of {}s",
            secs, MAX_TIME_LIMIT_SECS
        )));
    }
    Ok(())
}

fn check_memory_limit(mb: u64) -> EngineResult<()> {
    if mb == 0 {
        return Err(EngineError::InvalidLimits("memory limit must be at least 1 MB".to_string()));
    }
    if mb > MAX_MEMORY_LIMIT_MB {
        return Err(EngineError::InvalidLimits(format!(
            "memory limit of {} MB exceeds the maximum of {} MB",
            mb, MAX_MEMORY_LIMIT_MB
        )));
    }
    Ok(())
}

/// Static checks on a question file, no execution involved.
///
/// Catches what would otherwise only surface at grading time: empty testcase
/// lists, zero limits, bad marks, unknown allowed languages, duplicate ids.
pub fn validate_question(question: &Question, registry: &LanguageRegistry) -> EngineResult<()> {
    if question.testcases.is_empty() {
        return Err(EngineError::NoTestcases);
    }
    if !question.max_marks.is_finite() || question.max_marks < 0.0 {
        return Err(EngineError::InvalidMaxMarks(question.max_marks));
    }
    if let Some(secs) = question.time_limit_secs {
        check_time_limit(secs)?;
    }
    if let Some(mb) = question.memory_limit_mb {
        check_memory_limit(mb)?;
    }

    for language in &question.allowed_languages {
        registry.resolve(language)?;
    }

    let mut seen = std::collections::HashSet::new();
    for testcase in &question.testcases {
        if !seen.insert(testcase.id.as_str()) {
            return Err(EngineError::Config(format!("duplicate testcase id '{}'", testcase.id)));
        }
    }

    Ok(())
}
