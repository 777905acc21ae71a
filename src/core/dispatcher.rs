use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::{
    config::ExecutorConfig,
    core::{
        batch,
        domain::{ExecutionRequest, ExecutionResult, ExecutionSummary, Language, TestCase, TestResult},
        errors::RunnerError,
        traits::runner::Runner,
    },
    managed::{python::PythonRunner, runtime::ManagedRuntime},
    sandbox::{native::NativeRunner, registry::ContextRegistry},
    simulated::SimulatedRunner,
};

/// Entry point for everything that wants code executed.
///
/// Picks a runner by language, applies the default timeout and turns any
/// failure of the runner itself into a failed `ExecutionResult`.
#[derive(Debug, Clone)]
pub struct CodeExecutor {
    config: ExecutorConfig,
    registry: ContextRegistry,
    runtime: Arc<ManagedRuntime>,
    native: Arc<dyn Runner>,
    managed: Arc<dyn Runner>,
    simulated: Arc<dyn Runner>,
}

impl CodeExecutor {
    /// Uses the process-wide managed runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let runtime = ManagedRuntime::global(&config);
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(config: ExecutorConfig, runtime: Arc<ManagedRuntime>) -> Self {
        let registry = ContextRegistry::new();
        CodeExecutor {
            native: Arc::new(NativeRunner::new(&config, registry.clone())),
            managed: Arc::new(PythonRunner::new(&config, runtime.clone(), registry.clone())),
            simulated: Arc::new(SimulatedRunner::new(&config)),
            config,
            registry,
            runtime,
        }
    }

    /// Replaces the three execution strategies, keeping config and runtime.
    pub fn with_runners(
        self,
        native: Arc<dyn Runner>,
        managed: Arc<dyn Runner>,
        simulated: Arc<dyn Runner>,
    ) -> Self {
        CodeExecutor {
            native,
            managed,
            simulated,
            ..self
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    #[tracing::instrument(skip(self, code, stdin), fields(execution = %uuid::Uuid::new_v4()))]
    pub async fn run_single(
        &self,
        language: &str,
        code: &str,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let started = Instant::now();
        match self.dispatch(language, code, stdin, timeout).await {
            Ok(result) => {
                tracing::debug!(
                    success = result.success,
                    elapsed_ms = result.execution_time_ms,
                    "execution finished"
                );
                result
            }
            Err(err) => {
                tracing::error!(error = %err, "execution failed");
                ExecutionResult::crashed(err.to_string(), started.elapsed())
            }
        }
    }

    /// Runs `code` once per test case with the case's input as stdin.
    ///
    /// Cases run one after another; results come back in input order.
    #[tracing::instrument(skip(self, code, test_cases), fields(cases = test_cases.len()))]
    pub async fn run_batch(
        &self,
        language: &str,
        code: &str,
        test_cases: &[TestCase],
        timeout: Option<Duration>,
    ) -> Vec<TestResult> {
        let results = batch::run_sequentially(test_cases, move |input| async move {
            self.run_single(language, code, Some(&input), timeout).await
        })
        .await;

        let summary = ExecutionSummary::from(results.as_slice());
        tracing::info!(
            passed = summary.passed,
            total = summary.total,
            total_time_ms = summary.total_time_ms,
            all_passed = summary.all_passed(),
            "batch finished"
        );
        results
    }

    /// Bootstraps the managed runtime ahead of the first run. Safe to call
    /// any number of times, concurrently or not.
    pub async fn initialize_managed_runtime(&self) {
        self.runtime.initialize().await;
    }

    pub fn is_managed_runtime_ready(&self) -> bool {
        self.runtime.is_ready()
    }

    /// Tears down every execution context that is still alive.
    pub fn dispose(&self) {
        let released = self.registry.abort_all();
        tracing::info!(released, "executor disposed");
    }

    async fn dispatch(
        &self,
        language: &str,
        code: &str,
        stdin: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, RunnerError> {
        let language: Language = language.parse()?;
        let request = ExecutionRequest {
            code: code.to_string(),
            stdin: stdin.map(String::from),
            timeout: timeout.unwrap_or(self.config.default_timeout),
            language,
        };
        let runner = self.runner_for(&request.language);

        AssertUnwindSafe(async { runner.run(&request).await })
            .catch_unwind()
            .await
            .map_err(|panic| RunnerError::Panicked {
                msg: panic_message(&*panic),
            })?
    }

    fn runner_for(&self, language: &Language) -> &Arc<dyn Runner> {
        match language {
            l if l.is_native() => &self.native,
            Language::Python => &self.managed,
            _ => &self.simulated,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
