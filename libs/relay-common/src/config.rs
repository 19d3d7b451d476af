use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_SANDBOX_IMAGE: &str = "code-relay-executor";
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_CPU_FRACTION: f64 = 0.5;
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 5;
pub const DEFAULT_MAX_PARALLEL_TESTCASES: usize = 4;
/// Upper bounds accepted for per-question limits
pub const MAX_TIME_LIMIT_SECS: u64 = 3600;
pub const MAX_MEMORY_LIMIT_MB: u64 = 64 * 1024;
/// Lower bound on the slack added to remote request timeouts
pub const MIN_REMOTE_NETWORK_BUFFER_SECS: u64 = 2;

/// Engine configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Presence selects the remote execution client for every batch
    pub remote_execution_endpoint: Option<String>,
    pub sandbox_image: String,
    pub temp_root: PathBuf,
    pub default_memory_limit_mb: u64,
    /// Fraction of one core granted to a sandbox (0.5 = 50%)
    pub cpu_fraction: f64,
    pub default_time_limit_secs: u64,
    pub max_parallel_testcases: usize,
    pub remote_network_buffer_secs: u64,
    pub languages_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote_execution_endpoint = get("REMOTE_EXECUTION_URL")
            .or_else(|| get("PISTON_API_URL"))
            .map(|url| url.trim().trim_end_matches('/').to_string());

        let cpu_fraction = parse_or(get("DEFAULT_CPU_FRACTION"), "DEFAULT_CPU_FRACTION", DEFAULT_CPU_FRACTION);
        let cpu_fraction = if cpu_fraction > 0.0 && cpu_fraction <= 64.0 {
            cpu_fraction
        } else {
            warn!(value = cpu_fraction, "DEFAULT_CPU_FRACTION out of range, using default");
            DEFAULT_CPU_FRACTION
        };

        Self {
            remote_execution_endpoint,
            sandbox_image: get("SANDBOX_IMAGE").unwrap_or_else(|| DEFAULT_SANDBOX_IMAGE.to_string()),
            temp_root: get("SANDBOX_TEMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("code-relay")),
            default_memory_limit_mb: parse_or(
                get("DEFAULT_MEMORY_LIMIT_MB"),
                "DEFAULT_MEMORY_LIMIT_MB",
                DEFAULT_MEMORY_LIMIT_MB,
            ),
            cpu_fraction,
            default_time_limit_secs: parse_or(
                get("DEFAULT_TIME_LIMIT_SECS"),
                "DEFAULT_TIME_LIMIT_SECS",
                DEFAULT_TIME_LIMIT_SECS,
            ),
            max_parallel_testcases: parse_or(
                get("MAX_PARALLEL_TESTCASES"),
                "MAX_PARALLEL_TESTCASES",
                DEFAULT_MAX_PARALLEL_TESTCASES,
            )
            .max(1),
            remote_network_buffer_secs: parse_or(
                get("REMOTE_NETWORK_BUFFER_SECS"),
                "REMOTE_NETWORK_BUFFER_SECS",
                MIN_REMOTE_NETWORK_BUFFER_SECS,
            )
            .max(MIN_REMOTE_NETWORK_BUFFER_SECS),
            languages_file: get("LANGUAGES_FILE").map(PathBuf::from),
        }
    }

    pub fn uses_remote_backend(&self) -> bool {
        self.remote_execution_endpoint.is_some()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key = key, value = %value, "Invalid numeric configuration, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.remote_execution_endpoint, None);
        assert_eq!(config.sandbox_image, "code-relay-executor");
        assert_eq!(config.default_memory_limit_mb, 256);
        assert_eq!(config.cpu_fraction, 0.5);
        assert_eq!(config.default_time_limit_secs, 5);
        assert_eq!(config.remote_network_buffer_secs, 2);
        assert!(!config.uses_remote_backend());
    }

    #[test]
    fn test_remote_endpoint_selects_remote_backend() {
        let config = EngineConfig::from_lookup(lookup(&[(
            "PISTON_API_URL",
            "http://localhost:2000/api/v2/piston/",
        )]));
        assert!(config.uses_remote_backend());
        assert_eq!(
            config.remote_execution_endpoint.as_deref(),
            Some("http://localhost:2000/api/v2/piston")
        );
    }

    #[test]
    fn test_empty_endpoint_is_absent() {
        let config = EngineConfig::from_lookup(lookup(&[("REMOTE_EXECUTION_URL", "  ")]));
        assert!(!config.uses_remote_backend());
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DEFAULT_MEMORY_LIMIT_MB", "lots"),
            ("DEFAULT_CPU_FRACTION", "-1"),
            ("MAX_PARALLEL_TESTCASES", "0"),
            ("REMOTE_NETWORK_BUFFER_SECS", "1"),
        ]));
        assert_eq!(config.default_memory_limit_mb, 256);
        assert_eq!(config.cpu_fraction, 0.5);
        assert_eq!(config.max_parallel_testcases, 1);
        assert_eq!(config.remote_network_buffer_secs, 2);
    }
}
