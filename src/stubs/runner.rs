use std::time::Duration;

use crate::core::{
    domain::{ExecutionRequest, ExecutionResult},
    errors::RunnerError,
    traits::runner::Runner,
};

/// Answers every request with the same canned result after a fixed delay.
#[derive(Debug, Clone)]
pub struct RunnerStub {
    result: Result<ExecutionResult, RunnerError>,
    delay: Duration,
}

impl RunnerStub {
    pub fn new(result: Result<ExecutionResult, RunnerError>, delay: Duration) -> Self {
        Self { result, delay }
    }
}

#[async_trait::async_trait]
impl Runner for RunnerStub {
    #[tracing::instrument(skip(self))]
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError> {
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Execution result: {:?}", self.result);

        self.result.clone()
    }
}
