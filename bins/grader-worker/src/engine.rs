/// Execution Engine - Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Run one source file once inside the isolated runtime and capture raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (staging, subprocess, timeout)
/// - Engine does NOT know scoring rules or test cases
/// - Non-zero exit is a normal result, not an error
///
/// **Staging Discipline:**
/// The staged file is owned by a single `execute` call and is removed on every
/// exit path: success, failed run, timeout, launch fault, or panic.

use async_trait::async_trait;
use grader_common::{ExecutionResult, GradeError, Language, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;
use crate::runtime::{Invocation, IsolatedRuntime};

/// Execution engine trait
///
/// Any implementation must guarantee:
/// 1. Reject unknown language tags before any I/O
/// 2. Respect timeout_ms, terminating the run when it elapses
/// 3. Capture stdout/stderr completely
/// 4. Leave nothing staged behind
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Execute `source_code` once, feeding `input` on stdin and closing it
    async fn execute(
        &self,
        source_code: &str,
        language: &str,
        input: &str,
        timeout_ms: u64,
    ) -> Result<ExecutionResult>;
}

/// Engine that stages source files on disk and hands them to an isolated runtime
pub struct SandboxExecutor<R> {
    runtime: R,
    staging_dir: PathBuf,
}

impl<R: IsolatedRuntime> SandboxExecutor<R> {
    pub fn new(runtime: R, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Write the source under a globally unique `<uuid>.<ext>` name
    fn stage(&self, id: Uuid, language: Language, source_code: &str) -> Result<NamedTempFile> {
        let fault = |e: std::io::Error| GradeError::SandboxFault(format!("failed to stage source: {}", e));

        std::fs::create_dir_all(&self.staging_dir).map_err(fault)?;
        let suffix = format!(".{}", language.extension());
        let mut file = tempfile::Builder::new()
            .prefix(&id.to_string())
            .suffix(&suffix)
            .rand_bytes(0)
            .tempfile_in(&self.staging_dir)
            .map_err(fault)?;

        file.write_all(source_code.as_bytes()).map_err(fault)?;
        file.flush().map_err(fault)?;

        // the runtime user inside the container is not the file owner
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(fault)?;
        }

        Ok(file)
    }

    async fn run(&self, invocation: &Invocation, input: &str, timeout_ms: u64) -> Result<ExecutionResult> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let started = Instant::now();

        let mut command = self.runtime.command(invocation);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| GradeError::SandboxFault(format!("failed to launch runtime: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_owned();
            tokio::spawn(async move {
                // the program may exit without reading; a broken pipe is fine
                let _ = stdin.write_all(input.as_bytes()).await;
            });
        }
        let stdout_reader = tokio::spawn(drain(child.stdout.take()));
        let stderr_reader = tokio::spawn(drain(child.stderr.take()));

        let waited = tokio::time::timeout_at(deadline, child.wait()).await;
        let status = match waited {
            Ok(status) => status
                .map_err(|e| GradeError::SandboxFault(format!("failed to wait for runtime: {}", e)))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(invocation = %invocation.id, error = %e, "Failed to kill timed out runtime");
                }
                self.runtime.terminate(invocation).await;
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(GradeError::ExecutionTimeout { timeout_ms });
            }
        };

        // a forked grandchild can keep the pipes open after the runtime exits
        let stdout_abort = stdout_reader.abort_handle();
        let stderr_abort = stderr_reader.abort_handle();
        let captured = tokio::time::timeout_at(deadline, async {
            (stdout_reader.await, stderr_reader.await)
        })
        .await;
        let (stdout, stderr) = match captured {
            Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
            Err(_) => {
                self.runtime.terminate(invocation).await;
                stdout_abort.abort();
                stderr_abort.abort();
                return Err(GradeError::ExecutionTimeout { timeout_ms });
            }
        };

        Ok(ExecutionResult {
            success: status.success(),
            stdout,
            stderr,
            exit_code: status.code(),
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

async fn drain<P: AsyncRead + Unpin>(pipe: Option<P>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl<R: IsolatedRuntime> SandboxEngine for SandboxExecutor<R> {
    async fn execute(
        &self,
        source_code: &str,
        language: &str,
        input: &str,
        timeout_ms: u64,
    ) -> Result<ExecutionResult> {
        let language = Language::from_tag(language)?;
        self.runtime.prepare(language).await?;

        let id = Uuid::new_v4();
        let staged = self.stage(id, language, source_code)?;
        let invocation = Invocation {
            id,
            language,
            staged_path: staged.path().to_path_buf(),
        };
        debug!(invocation = %id, language = %language, path = %invocation.staged_path.display(), "Staged source");

        let result = self.run(&invocation, input, timeout_ms).await;

        if let Err(e) = staged.close() {
            warn!(invocation = %id, error = %e, "Failed to remove staged source");
        }

        let outcome = match &result {
            Ok(output) if output.success => "success",
            Ok(_) => "nonzero_exit",
            Err(e) => e.kind(),
        };
        let elapsed = result.as_ref().map(|r| r.execution_time_ms).unwrap_or(timeout_ms);
        metrics::record_sandbox_execution(&language.to_string(), outcome, elapsed as f64);

        result
    }
}
