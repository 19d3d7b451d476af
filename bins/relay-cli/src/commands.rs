// CLI commands for running and grading submissions
use anyhow::{Context, Result};
use relay_common::{EngineConfig, EvaluationSummary, Question};
use relay_engine::{validate_question, Coordinator, LanguageRegistry, ProbeSelection};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn load_question(path: &Path) -> Result<Question> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read question file {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse question file {}", path.display()))
}

fn load_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source file {}", path.display()))
}

fn load_registry(config: &EngineConfig) -> Result<LanguageRegistry> {
    match config.languages_file {
        Some(ref path) => LanguageRegistry::load(path),
        None => LanguageRegistry::builtin(),
    }
}

fn print_summary(summary: &EvaluationSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

pub async fn run(
    question_path: &Path,
    source_path: &Path,
    language: &str,
    input: Option<String>,
    expected: Option<String>,
) -> Result<()> {
    let question = load_question(question_path)?;
    let code = load_source(source_path)?;

    let selection = match input {
        Some(input) => ProbeSelection::Custom {
            input,
            expected_output: expected,
        },
        None => ProbeSelection::Visible,
    };

    let config = EngineConfig::from_env();
    let coordinator = Coordinator::from_config(&config)?;

    info!(language, backend = coordinator.backend_kind(), "Probing submission");

    let summary = coordinator.probe(&question, language, &code, selection).await?;
    print_summary(&summary)
}

pub async fn submit(question_path: &Path, source_path: &Path, language: &str, redact: bool) -> Result<()> {
    let question = load_question(question_path)?;
    let code = load_source(source_path)?;

    let config = EngineConfig::from_env();
    let coordinator = Coordinator::from_config(&config)?;

    info!(language, backend = coordinator.backend_kind(), "Grading submission");

    let summary = coordinator.grade(&question, language, &code).await?;

    info!(
        passed = summary.passed_tests,
        total = summary.total_tests,
        score = summary.score,
        max_marks = summary.max_marks,
        "Grading complete"
    );

    if redact {
        print_summary(&summary.visible_only())
    } else {
        print_summary(&summary)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LanguageListing<'a> {
    name: &'a str,
    aliases: &'a [String],
    compiled: bool,
    remote_language: &'a str,
    remote_version: &'a str,
}

pub fn list_languages() -> Result<()> {
    let config = EngineConfig::from_env();
    let registry = load_registry(&config)?;

    let listing: Vec<LanguageListing> = registry
        .profiles()
        .iter()
        .map(|p| LanguageListing {
            name: &p.name,
            aliases: &p.aliases,
            compiled: p.needs_compilation(),
            remote_language: &p.remote_language,
            remote_version: &p.remote_version,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

pub fn check(question_path: &Path) -> Result<()> {
    let question = load_question(question_path)?;
    let config = EngineConfig::from_env();
    let registry = load_registry(&config)?;

    if let Err(e) = validate_question(&question, &registry) {
        error!(file = %question_path.display(), error = %e, "Question file is invalid");
        return Err(e.into());
    }

    let visible = question.testcases.iter().filter(|tc| tc.is_visible()).count();
    println!(
        "✓ {} is valid: {} testcases ({} visible, {} hidden), max marks {}",
        question_path.display(),
        question.testcases.len(),
        visible,
        question.testcases.len() - visible,
        question.max_marks
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::Visibility;
    use std::io::Write;

    #[test]
    fn test_load_question_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "maxMarks": 10,
                "timeLimit": 2,
                "allowedLanguages": ["Python"],
                "testcases": [
                    {{"id": "1", "input": "1\n", "expectedOutput": "1\n", "visibility": "VISIBLE"}},
                    {{"id": "2", "input": "2\n", "expectedOutput": "2\n"}}
                ]
            }}"#
        )
        .unwrap();

        let question = load_question(file.path()).unwrap();
        assert_eq!(question.max_marks, 10.0);
        assert_eq!(question.time_limit_secs, Some(2));
        assert_eq!(question.testcases.len(), 2);
        assert_eq!(question.testcases[1].visibility, Visibility::Hidden);

        assert!(check(file.path()).is_ok());
    }

    #[test]
    fn test_check_rejects_question_without_testcases() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxMarks": 10, "testcases": []}}"#).unwrap();

        let err = check(file.path()).unwrap_err();
        assert!(err.to_string().contains("No testcases"));
    }

    #[test]
    fn test_missing_question_file() {
        let err = load_question(Path::new("/nonexistent/question.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read question file"));
    }
}
