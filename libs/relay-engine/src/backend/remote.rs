//! Remote execution client (Piston-compatible `POST {endpoint}/execute`).
//!
//! The remote service does not report wall time, so it is measured around the
//! HTTP call. Transport failures, timeouts and non-2xx answers all become
//! `backend_error` results.

use super::{check_request, ExecutionBackend};
use crate::languages::LanguageProfile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_common::{ExecutionRequest, RawExecutionResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct RemoteFile<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct RemoteExecuteRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<RemoteFile<'a>>,
    stdin: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteStage {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    signal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteExecuteResponse {
    run: RemoteStage,
    #[serde(default)]
    compile: Option<RemoteStage>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    message: String,
}

pub struct RemoteClient {
    http: reqwest::Client,
    execute_url: String,
    network_buffer: Duration,
}

impl RemoteClient {
    pub fn new(endpoint: &str, network_buffer_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            execute_url: format!("{}/execute", endpoint.trim_end_matches('/')),
            network_buffer: Duration::from_secs(network_buffer_secs),
        })
    }

    pub fn execute_url(&self) -> &str {
        &self.execute_url
    }

    async fn call(&self, request: &ExecutionRequest, profile: &LanguageProfile) -> Result<RawExecutionResult> {
        let body = RemoteExecuteRequest {
            language: &profile.remote_language,
            version: &profile.remote_version,
            files: vec![RemoteFile { content: &request.code }],
            stdin: &request.stdin,
        };

        // Tolerate queueing on the remote side
        let request_timeout = Duration::from_secs(request.time_limit_secs).saturating_add(self.network_buffer);
        let start_time = Instant::now();

        let response = self
            .http
            .post(&self.execute_url)
            .timeout(request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Remote execution timed out after {}s",
                        request_timeout.as_secs()
                    )
                } else {
                    anyhow::Error::new(e).context("Remote execution request failed")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<RemoteErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text);
            anyhow::bail!("Remote execution service returned {}: {}", status, message.trim());
        }

        let parsed: RemoteExecuteResponse = response
            .json()
            .await
            .context("Malformed response from remote execution service")?;

        let wall_time_ms = start_time.elapsed().as_millis() as u64;

        Ok(map_response(parsed, wall_time_ms))
    }
}

fn map_response(response: RemoteExecuteResponse, wall_time_ms: u64) -> RawExecutionResult {
    if let Some(compile) = response.compile {
        if compile.code.is_some_and(|c| c != 0) || compile.signal.is_some() {
            let stderr = match compile.stderr.filter(|s| !s.trim().is_empty()) {
                Some(stderr) => stderr,
                None => compile.stdout.unwrap_or_default(),
            };
            return RawExecutionResult {
                stdout: String::new(),
                stderr,
                wall_time_ms,
                exit_code: compile.code,
                signal: compile.signal,
                compile_failed: true,
                ..Default::default()
            };
        }
    }

    let run = response.run;
    RawExecutionResult {
        stdout: run.stdout.unwrap_or_default(),
        stderr: run.stderr.unwrap_or_default(),
        timed_out: false,
        wall_time_ms,
        exit_code: run.code,
        signal: run.signal,
        compile_failed: false,
        output_limit_exceeded: false,
        backend_error: None,
    }
}

#[async_trait]
impl ExecutionBackend for RemoteClient {
    async fn execute(&self, request: &ExecutionRequest, profile: &LanguageProfile) -> RawExecutionResult {
        if let Err(message) = check_request(request) {
            return RawExecutionResult::backend_failure(message);
        }

        match self.call(request, profile).await {
            Ok(result) => {
                debug!(
                    language = %profile.remote_language,
                    version = %profile.remote_version,
                    exit_code = ?result.exit_code,
                    signal = ?result.signal,
                    wall_time_ms = result.wall_time_ms,
                    "Remote execution finished"
                );
                result
            }
            Err(e) => {
                let message = format!("Execution failed: {:#}", e);
                warn!(url = %self.execute_url, error = %message, "Remote execution failure");
                RawExecutionResult::backend_failure(message)
            }
        }
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}
