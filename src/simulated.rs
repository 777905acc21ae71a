use std::time::{Duration, Instant};

use rand::Rng;

use crate::{
    config::ExecutorConfig,
    core::{
        domain::{ExecutionRequest, ExecutionResult},
        errors::{ExecutionError, RunnerError},
        traits::runner::Runner,
    },
};

/// At least one of these must appear for the source to count as plausible.
const STRUCTURE_MARKERS: &[&str] = &["main", "function", "def", "class"];

/// Stand-in for languages that cannot be executed here.
///
/// Nothing is compiled or run. Results carry `simulated = true` and callers
/// must present them as such.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    delay: (Duration, Duration),
}

impl SimulatedRunner {
    pub fn new(config: &ExecutorConfig) -> Self {
        SimulatedRunner {
            delay: config.simulated_delay,
        }
    }

    fn latency(&self) -> Duration {
        let (min, max) = self.delay;
        if min >= max {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

pub fn looks_like_code(code: &str) -> bool {
    STRUCTURE_MARKERS.iter().any(|marker| code.contains(marker))
}

#[async_trait::async_trait]
impl Runner for SimulatedRunner {
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError> {
        let started = Instant::now();
        let latency = self.latency();
        tracing::debug!(?latency, "simulating compile and run");

        if tokio::time::timeout(request.timeout, tokio::time::sleep(latency))
            .await
            .is_err()
        {
            return Ok(
                ExecutionResult::failure(ExecutionError::Timeout, "", started.elapsed()).simulated(),
            );
        }

        let result = if looks_like_code(&request.code) {
            ExecutionResult::success(
                format!(
                    "Hello World\n(Simulated {} execution)",
                    request.language.display_name()
                ),
                started.elapsed(),
            )
        } else {
            ExecutionResult::failure(
                ExecutionError::Validation(request.language.clone()),
                "",
                started.elapsed(),
            )
        };
        Ok(result.simulated())
    }
}
