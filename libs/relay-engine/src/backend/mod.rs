/// Execution Backends - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Execute one program against one stdin and capture raw outputs.
///
/// **Critical Architectural Boundary:**
/// - A backend knows HOW to execute (local container, remote service)
/// - A backend does NOT know scoring rules
/// - A backend does NOT evaluate correctness
/// - A backend never returns an error: infrastructure failures become
///   `RawExecutionResult::backend_error` so one testcase cannot abort a batch

mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::RemoteClient;

use crate::languages::LanguageProfile;
use async_trait::async_trait;
use relay_common::config::{MAX_MEMORY_LIMIT_MB, MAX_TIME_LIMIT_SECS};
use relay_common::{EngineConfig, ExecutionRequest, RawExecutionResult};
use std::sync::Arc;

/// Safety limits to prevent pathological inputs from reaching Docker or the network
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB
/// Per-stream cap on captured stdout/stderr
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1MB

/// Execution backend contract
///
/// Any implementation must guarantee:
/// 1. Execute `request.code` with `request.stdin`
/// 2. Bound the call by the request's time limit
/// 3. Capture stdout/stderr
/// 4. Report wall time
/// 5. Flag timeouts, compile failures and infrastructure errors
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        profile: &LanguageProfile,
    ) -> RawExecutionResult;

    /// Short label for logs
    fn kind(&self) -> &'static str;
}

/// The two production backends, selected once from configuration
pub enum Backend {
    Local(LocalBackend),
    Remote(RemoteClient),
}

impl Backend {
    /// Remote endpoint present ⇒ remote client, otherwise local isolation
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        match config.remote_execution_endpoint {
            Some(ref endpoint) => Ok(Backend::Remote(RemoteClient::new(
                endpoint,
                config.remote_network_buffer_secs,
            )?)),
            None => Ok(Backend::Local(LocalBackend::new(config)?)),
        }
    }
}

#[async_trait]
impl ExecutionBackend for Backend {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        profile: &LanguageProfile,
    ) -> RawExecutionResult {
        match self {
            Backend::Local(local) => local.execute(request, profile).await,
            Backend::Remote(remote) => remote.execute(request, profile).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Backend::Local(local) => local.kind(),
            Backend::Remote(remote) => remote.kind(),
        }
    }
}

/// Lets several coordinators share one backend
#[async_trait]
impl<B: ExecutionBackend + ?Sized> ExecutionBackend for Arc<B> {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        profile: &LanguageProfile,
    ) -> RawExecutionResult {
        (**self).execute(request, profile).await
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

/// Reject oversized payloads and out-of-range limits before any workspace or
/// network resource is touched
pub(crate) fn check_request(request: &ExecutionRequest) -> Result<(), String> {
    if request.code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(format!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        ));
    }
    if request.stdin.len() > MAX_TEST_INPUT_BYTES {
        return Err(format!(
            "Test input exceeds maximum size of {} bytes",
            MAX_TEST_INPUT_BYTES
        ));
    }
    if request.time_limit_secs == 0 || request.time_limit_secs > MAX_TIME_LIMIT_SECS {
        return Err(format!(
            "Time limit must be between 1 and {} seconds",
            MAX_TIME_LIMIT_SECS
        ));
    }
    if request.memory_limit_mb == 0 || request.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
        return Err(format!(
            "Memory limit must be between 1 and {} MB",
            MAX_MEMORY_LIMIT_MB
        ));
    }
    Ok(())
}

/// Append a captured chunk, keeping `buf` within `limit` bytes.
///
/// Returns `false` once the limit is hit; the overflowing tail is dropped at a
/// char boundary.
pub(crate) fn push_capped(buf: &mut String, chunk: &[u8], limit: usize) -> bool {
    let text = String::from_utf8_lossy(chunk);
    let room = limit.saturating_sub(buf.len());

    if text.len() <= room {
        buf.push_str(&text);
        return true;
    }

    let mut cut = room;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&text[..cut]);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: String, stdin: String) -> ExecutionRequest {
        ExecutionRequest {
            code,
            language: "Python".to_string(),
            stdin,
            time_limit_secs: 1,
            memory_limit_mb: 64,
        }
    }

    #[test]
    fn test_size_guard_accepts_normal_payloads() {
        assert!(check_request(&request("print(1)".into(), "1\n".into())).is_ok());
    }

    #[test]
    fn test_size_guard_rejects_large_source() {
        let err = check_request(&request("x".repeat(MAX_SOURCE_CODE_BYTES + 1), String::new()))
            .unwrap_err();
        assert!(err.contains("Source code exceeds"));
    }

    #[test]
    fn test_size_guard_rejects_large_input() {
        let err = check_request(&request(String::new(), "x".repeat(MAX_TEST_INPUT_BYTES + 1)))
            .unwrap_err();
        assert!(err.contains("Test input exceeds"));
    }

    #[test]
    fn test_limit_guard_rejects_out_of_range_limits() {
        let mut req = request("print(1)".into(), String::new());

        req.time_limit_secs = u64::MAX;
        assert!(check_request(&req).unwrap_err().contains("Time limit"));

        req.time_limit_secs = MAX_TIME_LIMIT_SECS;
        req.memory_limit_mb = u64::MAX;
        assert!(check_request(&req).unwrap_err().contains("Memory limit"));

        req.memory_limit_mb = MAX_MEMORY_LIMIT_MB;
        assert!(check_request(&req).is_ok());
    }

    #[test]
    fn test_push_capped_within_limit() {
        let mut buf = String::new();
        assert!(push_capped(&mut buf, b"hello ", 16));
        assert!(push_capped(&mut buf, b"world", 16));
        assert_eq!(buf, "hello world");
    }

    #[test]
    fn test_push_capped_stops_at_limit() {
        let mut buf = String::new();
        let chunk = vec![b'y'; 4096];

        let mut chunks = 0;
        while push_capped(&mut buf, &chunk, MAX_OUTPUT_BYTES) {
            chunks += 1;
        }

        assert_eq!(chunks, MAX_OUTPUT_BYTES / chunk.len());
        assert_eq!(buf.len(), MAX_OUTPUT_BYTES);
        assert!(!push_capped(&mut buf, b"more", MAX_OUTPUT_BYTES));
        assert_eq!(buf.len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_push_capped_respects_char_boundaries() {
        let mut buf = String::from("ab");
        // "é" is two bytes; only one byte of room is left
        assert!(!push_capped(&mut buf, "é".as_bytes(), 3));
        assert_eq!(buf, "ab");

        assert!(!push_capped(&mut buf, "cé".as_bytes(), 4));
        assert_eq!(buf, "abc");
    }

    #[test]
    fn test_remote_selected_when_endpoint_configured() {
        let config = EngineConfig {
            remote_execution_endpoint: Some("http://127.0.0.1:9".to_string()),
            ..EngineConfig::default()
        };
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.kind(), "remote");
    }
}
