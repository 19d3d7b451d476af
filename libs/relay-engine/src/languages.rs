// Language profile registry
// Maps logical language names (and aliases) to build/run artifacts
use anyhow::{Context, Result, bail};
use relay_common::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Built-in table, embedded so the engine never depends on the working directory
const BUILTIN_LANGUAGES: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../config/languages.json"
));

/// File the local backend writes the testcase input into
pub const STDIN_FILE_NAME: &str = "input.txt";

/// Marker dropped into the workspace when the compile step fails
pub const COMPILE_FAILED_MARKER: &str = ".compile_failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub source_file: String,
    #[serde(default)]
    pub compile_command: Option<String>,
    pub run_command: String,
    pub remote_language: String,
    pub remote_version: String,
}

impl LanguageProfile {
    /// Shell line executed inside the sandbox working directory.
    ///
    /// Compiled languages get `compile && run`; a failing compile leaves a marker
    /// file behind so the backend can tell compiler diagnostics from a crash.
    pub fn shell_command(&self) -> String {
        let run = format!("{} < {}", self.run_command, STDIN_FILE_NAME);
        match self.compile_command {
            Some(ref compile) => format!(
                "{{ {compile}; }} || {{ touch {marker}; exit 1; }}; {run}",
                compile = compile,
                marker = COMPILE_FAILED_MARKER,
                run = run,
            ),
            None => run,
        }
    }

    pub fn needs_compilation(&self) -> bool {
        self.compile_command.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

/// Immutable registry, loaded once at startup
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    /// Registry backed by the embedded languages.json
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_LANGUAGES).context("Failed to parse built-in languages.json")
    }

    /// Load language profiles from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;
        Self::from_profiles(languages_json.languages)
    }

    pub fn from_profiles(profiles: Vec<LanguageProfile>) -> Result<Self> {
        if profiles.is_empty() {
            bail!("No languages configured");
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (idx, profile) in profiles.iter().enumerate() {
            let keys = std::iter::once(&profile.name).chain(profile.aliases.iter());
            for key in keys {
                let key = key.trim().to_lowercase();
                if let Some(&existing) = index.get(&key) {
                    if existing != idx {
                        bail!(
                            "Language key '{}' is claimed by both {} and {}",
                            key,
                            profiles[existing].name,
                            profile.name
                        );
                    }
                }
                index.insert(key, idx);
            }
        }

        Ok(Self { profiles, index })
    }

    /// Case-insensitive lookup by name or alias
    pub fn resolve(&self, language: &str) -> Result<&LanguageProfile, EngineError> {
        self.index
            .get(&language.trim().to_lowercase())
            .map(|&idx| &self.profiles[idx])
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.resolve(language).is_ok()
    }

    /// List all canonical language names
    pub fn list_languages(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn profiles(&self) -> &[LanguageProfile] {
        &self.profiles
    }
}
