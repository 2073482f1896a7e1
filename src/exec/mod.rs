//! Execution engine: sandboxed runs of model-generated analysis code.
//!
//! Failures are never raised to the orchestrator; every outcome is packaged
//! as an [`ExecutionResult`] so it can be fed back to the model as a tool
//! response, giving it a chance to regenerate the code.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub mod python;

pub use python::PythonExecutor;

/// Mutually exclusive failure classification for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrorKind {
    SyntaxInGeneratedCode,
    RuntimeInGeneratedCode,
    ExecutionTimeout,
    DatasetNotFound,
    SandboxFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_spec: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExecErrorKind>,
}

impl ExecutionResult {
    pub fn ok(result: Option<Value>, plot_spec: Option<Value>, stdout: String) -> Self {
        Self {
            success: true,
            result,
            plot_spec,
            stdout,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ExecErrorKind, error: impl Into<String>) -> Self {
        Self::failure_with_stdout(kind, error, String::new())
    }

    /// Runtime faults keep the stdout accumulated up to the fault.
    pub fn failure_with_stdout(
        kind: ExecErrorKind,
        error: impl Into<String>,
        stdout: String,
    ) -> Self {
        Self {
            success: false,
            result: None,
            plot_spec: None,
            stdout,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}

/// Seam between the orchestrator and the sandbox. The implementation decides
/// how code actually runs; the contract is "always return a structured result".
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str, description: &str, filename: &str) -> ExecutionResult;
}
