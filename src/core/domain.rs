use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ExecutionError, RunnerError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    /// Any identifier without an execution path; handled by the simulated runner.
    Other(String),
}

impl Language {
    pub fn id(&self) -> &str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Other(id) => id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Python => "Python",
            Language::Other(id) => match id.as_str() {
                "java" => "Java",
                "cpp" => "C++",
                "go" => "Go",
                other => other,
            },
        }
    }

    /// Languages executed by the embedded script engine.
    pub fn is_native(&self) -> bool {
        matches!(self, Language::JavaScript | Language::TypeScript)
    }
}

impl FromStr for Language {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_lowercase();
        match id.as_str() {
            "" => Err(RunnerError::UnknownLanguage { id: s.to_string() }),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "python" | "py" => Ok(Language::Python),
            _ => Ok(Language::Other(id)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

/// Outcome of exactly one execution request.
///
/// `success` is the only authoritative failure signal; `output` may still hold
/// whatever the program printed before it failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
    /// Engine heap usage in bytes, when the runner can measure it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Set when the output is a placeholder and no code was actually run.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            execution_time_ms: as_millis(elapsed),
            memory_usage: None,
            stack_trace: None,
            simulated: false,
        }
    }

    pub fn failure(error: ExecutionError, output: impl Into<String>, elapsed: Duration) -> Self {
        let stack_trace = match &error {
            ExecutionError::Program { stack_trace, .. } => stack_trace.clone(),
            _ => None,
        };
        Self {
            success: false,
            output: output.into(),
            error: Some(error.to_string()),
            execution_time_ms: as_millis(elapsed),
            memory_usage: None,
            stack_trace,
            simulated: false,
        }
    }

    /// Result for a run that never produced one because the runner itself failed.
    pub fn crashed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message.into()),
            execution_time_ms: as_millis(elapsed),
            memory_usage: None,
            stack_trace: None,
            simulated: false,
        }
    }

    pub fn with_memory_usage(self, bytes: f64) -> Self {
        Self {
            memory_usage: Some(bytes),
            ..self
        }
    }

    pub fn simulated(self) -> Self {
        Self {
            simulated: true,
            ..self
        }
    }
}

pub fn as_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case: TestCase,
    pub passed: bool,
    pub actual_output: String,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<(&TestCase, ExecutionResult)> for TestResult {
    fn from((test_case, result): (&TestCase, ExecutionResult)) -> Self {
        let passed = result.success && result.output.trim() == test_case.expected_output.trim();
        TestResult {
            test_case: test_case.clone(),
            passed,
            actual_output: result.output,
            execution_time_ms: result.execution_time_ms,
            error: result.error,
        }
    }
}

/// Aggregate view over a batch run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub passed: usize,
    pub total: usize,
    pub total_time_ms: f64,
}

impl From<&[TestResult]> for ExecutionSummary {
    fn from(results: &[TestResult]) -> Self {
        ExecutionSummary {
            passed: results.iter().filter(|r| r.passed).count(),
            total: results.len(),
            total_time_ms: results.iter().map(|r| r.execution_time_ms).sum(),
        }
    }
}

impl ExecutionSummary {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// How a finished invocation ended, before it is folded into a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}
