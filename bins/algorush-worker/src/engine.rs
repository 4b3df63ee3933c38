/// Execution Engine - Sandboxed compile and run
///
/// **Core Responsibility:**
/// Compile and execute the program sitting in a workspace and capture raw
/// outputs. The workspace already holds the source and input files.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker here, anything behind `Sandbox`)
/// - Engine does NOT compare outputs or assign verdicts
/// - Program misbehavior (non-zero exit, crash, timeout) is data in the
///   outcome, never an error. Errors mean the sandbox itself is unusable
///   or the caller cancelled.
use crate::config::LanguageConfig;
use crate::error::{GradeError, Result, SandboxFault};
use crate::workspace::Workspace;
use algorush_common::config::GraderConfig;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Captured stdout/stderr are cut off past this size
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1MB

/// Mount point of the workspace inside the container
const SANDBOX_WORKDIR: &str = "/app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub ok: bool,
    /// Compiler diagnostics, verbatim.
    pub stderr: String,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl CompileOutcome {
    /// Outcome for languages without a compile step.
    pub fn skipped() -> Self {
        Self {
            ok: true,
            stderr: String::new(),
            elapsed_ms: 0,
            timed_out: false,
        }
    }
}

/// Raw result of one run. When `timed_out` is set `exit_code` is meaningless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Isolated compile/run backend.
///
/// Implementations must enforce no network, the memory ceiling, the CPU
/// share and the process-count ceiling from `GraderConfig`, and must tear
/// the execution context down before returning (including on cancellation).
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Compile `language.source_file` into `language.artifact`.
    async fn compile(
        &self,
        language: &LanguageConfig,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<CompileOutcome>;

    /// Run the artifact with stdin redirected from `language.input_file`.
    async fn run(
        &self,
        language: &LanguageConfig,
        workspace: &Workspace,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome>;
}

pub(crate) enum Supervised<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Drive `fut` until it finishes, `timeout` elapses or `cancel` fires,
/// whichever comes first. The future is dropped in the latter two cases.
pub(crate) async fn supervise<F: Future>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Supervised<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Supervised::Cancelled,
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(output) => Supervised::Completed(output),
            Err(_) => Supervised::TimedOut,
        },
    }
}

/// Container cleanup guard - guarantees container removal
///
/// The happy path awaits `remove`. If the owning future is dropped
/// (cancellation, panic) the guard schedules a forced removal instead.
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

    async fn kill(&self) {
        if let Err(e) = self
            .docker
            .kill_container(&self.container_id, None::<KillContainerOptions<String>>)
            .await
        {
            // Usually the container exited between the timeout and the kill
            debug!(container_id = %self.container_id, error = %e, "Kill failed");
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = self
            .docker
            .remove_container(&self.container_id, Some(force_remove()))
            .await
        {
            warn!(container_id = %self.container_id, error = %e, "Failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Cannot await in Drop; hand the removal to the runtime
        let docker = self.docker.clone();
        let container_id = std::mem::take(&mut self.container_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = docker.remove_container(&container_id, Some(force_remove())).await {
                        warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
                    }
                });
            }
            Err(_) => warn!(container_id = %container_id, "No runtime to cleanup container"),
        }
    }
}

fn force_remove() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    }
}

/// Docker-based sandbox
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if not present
/// 2. Creates one container per compile or run with:
///    - Network disabled (`network_mode = none`)
///    - Memory ceiling with swap pinned to the same value
///    - CPU share via nano-CPUs
///    - PID ceiling
///    - The workspace bind-mounted at /app
/// 3. Captures stdout/stderr, enforces the timeout, kills on overrun
/// 4. Removes the container unconditionally
pub struct DockerEngine {
    docker: Docker,
    config: GraderConfig,
}

impl DockerEngine {
    /// Connect to the local daemon and make sure it answers.
    pub async fn connect(config: GraderConfig) -> std::result::Result<Self, SandboxFault> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxFault::with_source("Failed to connect to Docker daemon", e))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxFault::with_source("Docker daemon did not answer ping", e))?;

        info!(
            memory_mb = config.memory_limit_mb,
            cpu_limit = config.cpu_limit,
            pids_limit = config.pids_limit,
            "Docker sandbox ready"
        );
        Ok(Self { docker, config })
    }

    /// Ensure Docker image is available (pull if needed)
    pub async fn ensure_image(&self, image: &str) -> std::result::Result<(), SandboxFault> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxFault::with_source(format!("Failed to pull image {}", image), e))?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, image: &str, cmd: &[String], mount: String) -> Config<String> {
        let memory = self.config.memory_limit_bytes();
        Config {
            image: Some(image.to_string()),
            cmd: Some(cmd.to_vec()),
            entrypoint: Some(vec![]),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(HostConfig {
                binds: Some(vec![mount]),
                network_mode: Some("none".to_string()),
                memory: Some(memory),
                memory_swap: Some(memory),
                nano_cpus: Some(self.config.nano_cpus()),
                pids_limit: Some(self.config.pids_limit),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// One container lifecycle: create, start, collect, enforce the timeout,
    /// remove. Only daemon failures and cancellation are errors.
    async fn run_container(
        &self,
        image: &str,
        cmd: &[String],
        workspace: &Workspace,
        timeout: Duration,
        cancel: &CancellationToken,
        purpose: &str,
    ) -> Result<ExecutionOutcome> {
        self.ensure_image(image).await?;

        let host_dir = workspace
            .path()
            .canonicalize()
            .map_err(|source| GradeError::Workspace {
                path: workspace.path().to_path_buf(),
                source,
            })?;
        let mount = format!("{}:{}", host_dir.display(), SANDBOX_WORKDIR);
        let container_name = format!("algorush-{}-{}", purpose, uuid::Uuid::new_v4());

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                self.container_config(image, cmd, mount),
            )
            .await
            .map_err(|e| SandboxFault::with_source("Failed to create container", e))?;

        // CRITICAL: guard before anything else can fail
        let guard = ContainerGuard::new(&self.docker, container.id.clone());

        let start_time = Instant::now();
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxFault::with_source("Failed to start container", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let supervised = supervise(
            self.collect_output(&container.id, &mut stdout, &mut stderr),
            timeout,
            cancel,
        )
        .await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        let outcome = match supervised {
            Supervised::Completed(Ok(exit_code)) => {
                if let Some(note) = exit_code.and_then(exit_code_note) {
                    stderr.push_str(note);
                }
                ExecutionOutcome {
                    stdout,
                    stderr,
                    exit_code,
                    timed_out: false,
                    elapsed_ms,
                }
            }
            Supervised::Completed(Err(e)) => {
                guard.remove().await;
                return Err(SandboxFault::with_source("Lost contact with container", e).into());
            }
            Supervised::TimedOut => {
                warn!(
                    container = %container_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, killing container"
                );
                guard.kill().await;
                ExecutionOutcome {
                    stdout,
                    stderr,
                    exit_code: None,
                    timed_out: true,
                    elapsed_ms,
                }
            }
            Supervised::Cancelled => {
                guard.kill().await;
                guard.remove().await;
                return Err(GradeError::Cancelled);
            }
        };

        guard.remove().await;
        Ok(outcome)
    }

    /// Stream logs until the container stops, then read its exit code.
    async fn collect_output(
        &self,
        container_id: &str,
        stdout: &mut String,
        stderr: &mut String,
    ) -> std::result::Result<Option<i64>, bollard::errors::Error> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output? {
                LogOutput::StdOut { message } => push_capped(stdout, &message),
                LogOutput::StdErr { message } => push_capped(stderr, &message),
                _ => {}
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        match wait_stream.next().await {
            Some(Ok(response)) => Ok(Some(response.status_code)),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(Some(code)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    #[tracing::instrument(skip_all, fields(language = %language.name, workspace = %workspace.id()))]
    async fn compile(
        &self,
        language: &LanguageConfig,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<CompileOutcome> {
        let Some(cmd) = &language.compile else {
            return Ok(CompileOutcome::skipped());
        };

        let timeout = Duration::from_millis(self.config.compile_timeout_ms);
        let outcome = self
            .run_container(&language.image, cmd, workspace, timeout, cancel, "compile")
            .await?;

        let ok = outcome.succeeded();
        // g++ writes diagnostics to stderr; some toolchains use stdout
        let diagnostics = if outcome.stderr.trim().is_empty() {
            outcome.stdout
        } else {
            outcome.stderr
        };

        if ok {
            debug!(elapsed_ms = outcome.elapsed_ms, "Compilation succeeded");
        } else {
            warn!(
                elapsed_ms = outcome.elapsed_ms,
                timed_out = outcome.timed_out,
                error_preview = diagnostics.lines().next().unwrap_or(""),
                "Compilation failed"
            );
        }

        Ok(CompileOutcome {
            ok,
            stderr: diagnostics,
            elapsed_ms: outcome.elapsed_ms,
            timed_out: outcome.timed_out,
        })
    }

    #[tracing::instrument(skip_all, fields(language = %language.name, workspace = %workspace.id(), timeout_ms = timeout.as_millis() as u64))]
    async fn run(
        &self,
        language: &LanguageConfig,
        workspace: &Workspace,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let outcome = self
            .run_container(&language.image, &language.run, workspace, timeout, cancel, "run")
            .await?;

        debug!(
            elapsed_ms = outcome.elapsed_ms,
            exit_code = ?outcome.exit_code,
            timed_out = outcome.timed_out,
            "Run finished"
        );
        Ok(outcome)
    }
}

/// Annotation for exit codes that mean the kernel killed the program
fn exit_code_note(code: i64) -> Option<&'static str> {
    match code {
        137 => Some("\n[Container killed: likely OOM or exceeded memory limit]"),
        139 => Some("\n[Container killed: segmentation fault]"),
        _ => None,
    }
}

fn push_capped(buf: &mut String, bytes: &[u8]) {
    if buf.len() >= MAX_OUTPUT_BYTES {
        return;
    }
    let text = String::from_utf8_lossy(bytes);
    let room = MAX_OUTPUT_BYTES - buf.len();
    if text.len() <= room {
        buf.push_str(&text);
    } else {
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buf.push_str(&text[..cut]);
    }
}
