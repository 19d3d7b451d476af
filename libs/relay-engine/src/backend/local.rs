/// Local Isolation Backend
///
/// **Docker Execution Rules:**
/// 1. Allocates a fresh workspace under the process-wide temp root
/// 2. Writes the source file and `input.txt` into it
/// 3. Runs the sandbox image with the workspace as its only writable mount:
///    - Network disabled
///    - Memory capped, CPU throttled via period/quota
/// 4. Captures stdout/stderr streams
/// 5. Kills the container at the time limit, keeping partial output
/// 6. Removes the container and the workspace on every exit path

use super::{check_request, push_capped, ExecutionBackend, MAX_OUTPUT_BYTES};
use crate::languages::{LanguageProfile, COMPILE_FAILED_MARKER, STDIN_FILE_NAME};
use crate::workspace::{self, Workspace};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use relay_common::types::{OUTPUT_LIMIT_MESSAGE, TIMEOUT_SENTINEL};
use relay_common::{EngineConfig, ExecutionRequest, RawExecutionResult};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Mount point of the workspace inside the sandbox
const SANDBOX_WORKDIR: &str = "/workspace";
/// CFS period; the quota is derived from the configured CPU fraction
const CPU_PERIOD_US: i64 = 100_000;

/// Container cleanup guard - guarantees container removal
/// `remove` is the normal path; Drop only covers panics and cancellation
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&self.container_id, Some(options)).await {
            warn!(container_id = %self.container_id, error = %e, "Failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Best-effort cleanup - cannot be async in Drop
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                    warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
                }
            });
        }
    }
}

/// Docker-backed sandbox executor
pub struct LocalBackend {
    docker: Docker,
    image: String,
    temp_root: &'static Path,
    cpu_quota: i64,
}

impl LocalBackend {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        let temp_root = workspace::init_temp_root(&config.temp_root).with_context(|| {
            format!("Failed to initialize temp root {}", config.temp_root.display())
        })?;

        info!(
            image = %config.sandbox_image,
            temp_root = %temp_root.display(),
            cpu_fraction = config.cpu_fraction,
            "Local isolation backend ready"
        );

        Ok(Self {
            docker,
            image: config.sandbox_image.clone(),
            temp_root,
            cpu_quota: cpu_quota_for(config.cpu_fraction),
        })
    }

    /// Ensure the sandbox image is available (pull if needed)
    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("Failed to pull sandbox image '{}'", self.image))?;
        }

        info!(image = %self.image, "Image pulled successfully");
        Ok(())
    }

    fn container_config(
        &self,
        ws: &Workspace,
        profile: &LanguageProfile,
        memory_limit_mb: u64,
    ) -> Result<Config<String>> {
        let memory_bytes = memory_bytes_for(memory_limit_mb)?;

        let mut labels = HashMap::new();
        labels.insert("code-relay.execution-id".to_string(), ws.execution_id().to_string());

        Ok(Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                profile.shell_command(),
            ]),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: No network access
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", ws.path().display(), SANDBOX_WORKDIR)]),
                memory: Some(memory_bytes),
                memory_swap: Some(memory_bytes),
                cpu_period: Some(CPU_PERIOD_US),
                cpu_quota: Some(self.cpu_quota),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn run(&self, request: &ExecutionRequest, profile: &LanguageProfile) -> Result<RawExecutionResult> {
        // Removed only after the container is gone; Drop covers the error paths
        let ws = Workspace::prepare(
            self.temp_root,
            vec![
                (profile.source_file.clone(), request.code.clone()),
                (STDIN_FILE_NAME.to_string(), request.stdin.clone()),
            ],
        )
        .await
        .context("Failed to prepare workspace")?;
        let execution_id = ws.execution_id();

        self.ensure_image().await?;

        let create_options = CreateContainerOptions {
            name: format!("code-relay-{}", execution_id),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(&ws, profile, request.memory_limit_mb)?)
            .await
            .context("Failed to create sandbox container")?;

        let guard = ContainerGuard::new(&self.docker, container.id.clone());
        let container_id = container.id;

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start sandbox container")?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut output_exceeded = false;

        // Borrows stdout/stderr so partial output survives a timeout
        let execution_future = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                let within_limit = match output {
                    Ok(LogOutput::StdOut { message }) => push_capped(&mut stdout, &message, MAX_OUTPUT_BYTES),
                    Ok(LogOutput::StdErr { message }) => push_capped(&mut stderr, &message, MAX_OUTPUT_BYTES),
                    Ok(_) => true,
                    Err(e) => {
                        warn!(execution_id = %execution_id, error = %e, "Error reading container logs");
                        break;
                    }
                };

                if !within_limit {
                    output_exceeded = true;
                    warn!(
                        execution_id = %execution_id,
                        limit_bytes = MAX_OUTPUT_BYTES,
                        "Output limit exceeded, killing container"
                    );
                    if let Err(e) = self
                        .docker
                        .kill_container(&container_id, None::<KillContainerOptions<String>>)
                        .await
                    {
                        warn!(execution_id = %execution_id, error = %e, "Failed to kill container");
                    }
                    break;
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait_stream = self.docker.wait_container(&container_id, Some(wait_options));
            match wait_stream.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(execution_id = %execution_id, error = %e, "Failed to get container exit code");
                    None
                }
                None => None,
            }
        };

        let time_limit = Duration::from_secs(request.time_limit_secs);
        let outcome = tokio::time::timeout(time_limit, execution_future).await;

        let (exit_code, timed_out) = match outcome {
            Ok(code) => (code, false),
            Err(_) => {
                warn!(
                    execution_id = %execution_id,
                    time_limit_secs = request.time_limit_secs,
                    "Execution timed out, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(execution_id = %execution_id, error = %e, "Failed to kill timed-out container");
                }
                (None, true)
            }
        };

        let wall_time_ms = start_time.elapsed().as_millis() as u64;

        // Force removal waits for the process tree to be gone
        guard.remove().await;

        let compile_failed = !timed_out && ws.contains(COMPILE_FAILED_MARKER);
        ws.remove().await;

        if timed_out && stderr.trim().is_empty() {
            stderr.push_str(TIMEOUT_SENTINEL);
        }
        if output_exceeded {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("{} ({} bytes)", OUTPUT_LIMIT_MESSAGE, MAX_OUTPUT_BYTES));
        }
        match exit_code {
            // The kill above, not the memory cap
            Some(137) if output_exceeded => {}
            Some(137) if !compile_failed => {
                stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
            }
            Some(139) if !compile_failed => {
                stderr.push_str("\n[Container killed: segmentation fault]");
            }
            _ => {}
        }

        debug!(
            execution_id = %execution_id,
            exit_code = ?exit_code,
            timed_out,
            compile_failed,
            wall_time_ms,
            "Sandbox execution finished"
        );

        Ok(RawExecutionResult {
            stdout,
            stderr,
            timed_out,
            wall_time_ms,
            exit_code,
            signal: None,
            compile_failed,
            output_limit_exceeded: output_exceeded,
            backend_error: None,
        })
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn execute(&self, request: &ExecutionRequest, profile: &LanguageProfile) -> RawExecutionResult {
        if let Err(message) = check_request(request) {
            return RawExecutionResult::backend_failure(message);
        }

        match self.run(request, profile).await {
            Ok(result) => result,
            Err(e) => {
                warn!(language = %profile.name, error = %format!("{:#}", e), "Local sandbox failure");
                RawExecutionResult::backend_failure(format!("Local sandbox unavailable: {:#}", e))
            }
        }
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

fn memory_bytes_for(memory_limit_mb: u64) -> Result<i64> {
    memory_limit_mb
        .checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .with_context(|| format!("Memory limit of {} MB is out of range", memory_limit_mb))
}

fn cpu_quota_for(cpu_fraction: f64) -> i64 {
    // Docker rejects quotas below 1ms
    ((cpu_fraction * CPU_PERIOD_US as f64).round() as i64).max(1_000)
}
