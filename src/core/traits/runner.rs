use crate::core::{
    domain::{ExecutionRequest, ExecutionResult},
    errors::RunnerError,
};

/// One execution strategy.
///
/// Program-level failures (exceptions, timeouts, unavailable runtimes) are
/// returned inside `Ok(ExecutionResult)`. `Err` is reserved for failures of
/// the runner itself.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Runner: std::fmt::Debug + Send + Sync {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError>;
}
