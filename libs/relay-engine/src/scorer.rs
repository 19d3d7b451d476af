/// Scorer - Backend-Agnostic Aggregation
///
/// **Critical Properties:**
/// - Knows nothing about Docker or remote services
/// - Knows nothing about language runtimes
/// - Pure function: (testcase results, max marks) → summary
///
/// **Scoring Rules:**
/// - score = passed_tests / total_tests * max_marks, rounded to 2 decimals
/// - 0 ≤ score ≤ max_marks
/// - average_execution_time_ms = mean over every result, failures included
/// - an empty result set is rejected, never scored

use chrono::Utc;
use relay_common::error::EngineResult;
use relay_common::{EngineError, EvaluationSummary, TestcaseResult};

pub fn summarize(results: Vec<TestcaseResult>, max_marks: f64) -> EngineResult<EvaluationSummary> {
    if !max_marks.is_finite() || max_marks < 0.0 {
        return Err(EngineError::InvalidMaxMarks(max_marks));
    }
    if results.is_empty() {
        return Err(EngineError::NoTestcases);
    }

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();

    let raw_score = passed_tests as f64 / total_tests as f64 * max_marks;
    let score = round_to_hundredths(raw_score).clamp(0.0, max_marks);

    let total_time: u64 = results.iter().map(|r| r.execution_time_ms).sum();
    let average_execution_time_ms = total_time as f64 / total_tests as f64;

    Ok(EvaluationSummary {
        total_tests,
        passed_tests,
        score,
        max_marks,
        average_execution_time_ms,
        evaluated_at: Utc::now(),
        results,
    })
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::{TestStatus, Visibility};

    fn result(id: &str, passed: bool, execution_time_ms: u64) -> TestcaseResult {
        TestcaseResult {
            testcase_id: id.to_string(),
            passed,
            status: if passed { TestStatus::Passed } else { TestStatus::WrongAnswer },
            visibility: Visibility::Visible,
            input: String::new(),
            expected_output: "x".to_string(),
            actual_output: if passed { "x".to_string() } else { String::new() },
            error: None,
            execution_time_ms,
        }
    }

    #[test]
    fn test_all_pass() {
        let summary = summarize(vec![result("1", true, 40), result("2", true, 60)], 50.0).unwrap();

        assert_eq!(summary.total_tests, 2);
        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.score, 50.0);
        assert_eq!(summary.average_execution_time_ms, 50.0);
    }

    #[test]
    fn test_two_of_three_rounds_to_hundredths() {
        let summary = summarize(
            vec![result("1", true, 10), result("2", true, 20), result("3", false, 0)],
            100.0,
        )
        .unwrap();

        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.score, 66.67);
        assert_eq!(summary.average_execution_time_ms, 10.0);
    }

    #[test]
    fn test_all_fail() {
        let summary = summarize(vec![result("1", false, 5)], 10.0).unwrap();
        assert_eq!(summary.score, 0.0);
        assert_eq!(summary.passed_tests, 0);
    }

    #[test]
    fn test_empty_results_rejected() {
        assert!(matches!(summarize(vec![], 100.0), Err(EngineError::NoTestcases)));
    }

    #[test]
    fn test_invalid_max_marks_rejected() {
        assert!(matches!(
            summarize(vec![result("1", true, 1)], -1.0),
            Err(EngineError::InvalidMaxMarks(_))
        ));
        assert!(summarize(vec![result("1", true, 1)], f64::NAN).is_err());
    }

    #[test]
    fn test_score_bounds_and_proportionality() {
        for total in 1..=12usize {
            for passed in 0..=total {
                let results: Vec<_> = (0..total)
                    .map(|i| result(&i.to_string(), i < passed, 1))
                    .collect();
                let summary = summarize(results, 100.0).unwrap();

                assert!(summary.score >= 0.0 && summary.score <= 100.0);
                let expected = passed as f64 / total as f64 * 100.0;
                assert!((summary.score - expected).abs() <= 0.005 + f64::EPSILON);
            }
        }
    }

    #[test]
    fn test_results_keep_input_order() {
        let summary = summarize(
            vec![result("c", true, 1), result("a", false, 1), result("b", true, 1)],
            3.0,
        )
        .unwrap();
        let ids: Vec<_> = summary.results.iter().map(|r| r.testcase_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
