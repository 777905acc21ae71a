use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{
    config::ExecutorConfig,
    core::{
        domain::{ExecutionRequest, ExecutionResult, ExecutionState, Language},
        errors::{ExecutionError, RunnerError},
        traits::runner::Runner,
    },
    managed::runtime::ManagedRuntime,
    sandbox::registry::ContextRegistry,
};

/// Runs Python programs through the shared managed runtime.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    runtime: Arc<ManagedRuntime>,
    registry: ContextRegistry,
    scratch_dir: PathBuf,
}

impl PythonRunner {
    pub fn new(
        config: &ExecutorConfig,
        runtime: Arc<ManagedRuntime>,
        registry: ContextRegistry,
    ) -> Self {
        PythonRunner {
            runtime,
            registry,
            scratch_dir: config.scratch_dir.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Runner for PythonRunner {
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError> {
        let started = Instant::now();

        let Some(interpreter) = self.runtime.initialize().await else {
            return Ok(ExecutionResult::failure(
                ExecutionError::RuntimeUnavailable(Language::Python),
                "",
                started.elapsed(),
            ));
        };

        let _serial = self.runtime.exclusive().await;
        let lease = self.registry.acquire();

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| RunnerError::Internal { msg: e.to_string() })?;
        let source_path = self.scratch_dir.join(format!("{}.py", lease.id()));
        tokio::fs::write(&source_path, &request.code)
            .await
            .map_err(|e| RunnerError::Internal { msg: e.to_string() })?;

        let spawned = Command::new(&interpreter.program)
            .arg("-I")
            .arg(&source_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_source(&source_path).await;
                return Err(RunnerError::Internal {
                    msg: format!("Failed to spawn interpreter: {e}"),
                });
            }
        };

        // Feed stdin from a separate task so a program that never reads it
        // cannot block us on a full pipe. Dropping the handle signals EOF.
        if let Some(mut stdin_handle) = child.stdin.take() {
            let input = request.stdin.clone().unwrap_or_default();
            tokio::spawn(async move {
                if let Err(e) = stdin_handle.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "program closed stdin early");
                }
            });
        }

        // Dropping the wait future drops the child, which kills it.
        let finished = tokio::select! {
            waited = tokio::time::timeout(request.timeout, child.wait_with_output()) => match waited {
                Ok(Ok(output)) => Finished::Exited(output),
                Ok(Err(e)) => {
                    remove_source(&source_path).await;
                    return Err(RunnerError::Internal {
                        msg: format!("Failed to wait for interpreter: {e}"),
                    });
                }
                Err(_) => Finished::TimedOut,
            },
            _ = lease.handle().aborted() => Finished::Aborted,
        };
        remove_source(&source_path).await;
        let elapsed = started.elapsed();

        let (state, result) = match finished {
            Finished::TimedOut => (
                ExecutionState::TimedOut,
                ExecutionResult::failure(ExecutionError::Timeout, "", elapsed),
            ),
            Finished::Aborted => (
                ExecutionState::Aborted,
                ExecutionResult::failure(ExecutionError::Aborted, "", elapsed),
            ),
            Finished::Exited(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if output.status.success() {
                    if !stderr.is_empty() {
                        tracing::debug!(%stderr, "program wrote to stderr");
                    }
                    (
                        ExecutionState::Succeeded,
                        ExecutionResult::success(stdout, elapsed),
                    )
                } else {
                    let message = last_line(&stderr)
                        .unwrap_or_else(|| format!("Process exited with {}", output.status));
                    let stack_trace = Some(stderr.trim().to_string()).filter(|s| !s.is_empty());
                    (
                        ExecutionState::Failed,
                        ExecutionResult::failure(
                            ExecutionError::Program {
                                message,
                                stack_trace,
                            },
                            stdout,
                            elapsed,
                        ),
                    )
                }
            }
        };
        tracing::debug!(?state, ?elapsed, "program finished");

        Ok(result)
    }
}

enum Finished {
    Exited(std::process::Output),
    TimedOut,
    Aborted,
}

/// The exception line of a traceback, e.g. `ZeroDivisionError: division by zero`.
fn last_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
}

async fn remove_source(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove program source");
    }
}
