//! Out-of-process Python sandbox with a hard wall-clock timeout.
//!
//! Generated code runs inside a harness that exposes an explicit allow-list
//! namespace: primitive builtins, the tabular library handle (`pd`), `json`,
//! and the bound `filename`. The harness captures stdout, reads back the
//! `result` and `plot_spec` bindings, and reports exactly one JSON payload on
//! its own stdout. The worker process is killed when the timeout elapses
//! (`kill_on_drop`); kill delivery is asynchronous, so a residual side effect
//! inside the kill window is still possible.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::{info, warn};

use crate::config::Config;

use super::{CodeExecutor, ExecErrorKind, ExecutionResult};

/// Harness the generated code runs inside. Invoked as
/// `python3 -c HARNESS <filename>` with the code itself on stdin.
const HARNESS: &str = r#"
import io
import json
import math
import sys
import datetime as _dt

def _clean(obj):
    if isinstance(obj, dict):
        return {str(k): _clean(v) for k, v in obj.items()}
    if isinstance(obj, (list, tuple, set)):
        return [_clean(v) for v in obj]
    if isinstance(obj, bool) or obj is None or isinstance(obj, (str, int)):
        return obj
    if isinstance(obj, float):
        return obj if math.isfinite(obj) else None
    if isinstance(obj, (_dt.datetime, _dt.date)):
        return obj.isoformat()
    if hasattr(obj, "item"):
        try:
            return _clean(obj.item())
        except Exception:
            pass
    if hasattr(obj, "tolist"):
        try:
            return _clean(obj.tolist())
        except Exception:
            pass
    if hasattr(obj, "isoformat"):
        try:
            return obj.isoformat()
        except Exception:
            pass
    if hasattr(obj, "to_plotly_json"):
        try:
            return _clean(obj.to_plotly_json())
        except Exception:
            pass
    if hasattr(obj, "to_dict"):
        try:
            return _clean(obj.to_dict())
        except Exception:
            pass
    return str(obj)

def _emit(payload):
    try:
        text = json.dumps(payload, allow_nan=False)
    except (TypeError, ValueError) as exc:
        text = json.dumps({
            "status": "runtime",
            "message": "result not JSON-serializable: %s" % exc,
            "stdout": payload.get("stdout", ""),
        })
    sys.stdout.write(text)
    sys.stdout.flush()

filename = sys.argv[1]
code = sys.stdin.read()
try:
    import pandas as pd
except ImportError:
    pd = None

safe_builtins = {
    "range": range, "len": len, "str": str, "int": int, "float": float,
    "bool": bool, "list": list, "dict": dict, "tuple": tuple, "set": set,
    "sum": sum, "min": min, "max": max, "abs": abs, "round": round,
    "sorted": sorted, "reversed": reversed, "enumerate": enumerate,
    "zip": zip, "print": print, "isinstance": isinstance, "type": type,
}
glb = {"pd": pd, "json": json, "__builtins__": safe_builtins}
loc = {"filename": filename}

buf = io.StringIO()
real_stdout = sys.stdout
sys.stdout = buf
try:
    compiled = compile(code, "<generated>", "exec")
except SyntaxError as exc:
    sys.stdout = real_stdout
    _emit({"status": "syntax", "line": exc.lineno or 0, "message": exc.msg or "invalid syntax"})
else:
    try:
        exec(compiled, glb, loc)
    except BaseException as exc:
        sys.stdout = real_stdout
        _emit({
            "status": "runtime",
            "message": "%s: %s" % (type(exc).__name__, exc),
            "stdout": buf.getvalue(),
        })
    else:
        sys.stdout = real_stdout
        _emit({
            "status": "ok",
            "result": _clean(loc.get("result")),
            "plot_spec": _clean(loc.get("plot_spec")),
            "stdout": buf.getvalue(),
        })
"#;

#[derive(Debug, Clone)]
pub struct PythonExecutor {
    python_bin: String,
    timeout: Duration,
}

impl PythonExecutor {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self { python_bin: python_bin.into(), timeout }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.python_bin(), cfg.exec_timeout())
    }
}

#[async_trait]
impl CodeExecutor for PythonExecutor {
    async fn execute(&self, code: &str, description: &str, filename: &str) -> ExecutionResult {
        info!(description, filename, "executing generated code");

        if !Path::new(filename).exists() {
            warn!(filename, "dataset file missing, refusing to execute");
            return ExecutionResult::failure(
                ExecErrorKind::DatasetNotFound,
                format!("File not found: {}", filename),
            );
        }

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-c")
            .arg(HARNESS)
            .arg(filename)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failure(
                    ExecErrorKind::SandboxFailure,
                    format!("failed to spawn {}: {}", self.python_bin, e),
                )
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                return ExecutionResult::failure(
                    ExecErrorKind::SandboxFailure,
                    format!("failed to hand code to the sandbox: {}", e),
                );
            }
            // dropping stdin closes the pipe so the harness sees EOF
        }

        // On timeout the wait future (owning the child) is dropped and the
        // worker is killed; output up to that point is discarded.
        let out = match timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "code execution timed out");
                return ExecutionResult::failure(
                    ExecErrorKind::ExecutionTimeout,
                    format!("Code execution timed out ({}s limit)", self.timeout.as_secs()),
                );
            }
            Ok(Err(e)) => {
                return ExecutionResult::failure(
                    ExecErrorKind::SandboxFailure,
                    format!("sandbox wait failed: {}", e),
                )
            }
            Ok(Ok(out)) => out,
        };

        let stdout_text = String::from_utf8_lossy(&out.stdout);
        match serde_json::from_str::<HarnessPayload>(stdout_text.trim()) {
            Ok(payload) => payload.into_result(),
            Err(_) => {
                let stderr_text = String::from_utf8_lossy(&out.stderr);
                ExecutionResult::failure(
                    ExecErrorKind::SandboxFailure,
                    format!(
                        "sandbox produced no result (exit code {}): {}",
                        out.status.code().unwrap_or(-1),
                        stderr_text.trim(),
                    ),
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HarnessPayload {
    status: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    plot_spec: Value,
}

impl HarnessPayload {
    fn into_result(self) -> ExecutionResult {
        match self.status.as_str() {
            "ok" => ExecutionResult::ok(
                non_null(self.result),
                non_null(self.plot_spec),
                self.stdout,
            ),
            "syntax" => ExecutionResult::failure(
                ExecErrorKind::SyntaxInGeneratedCode,
                format!("Syntax error at line {}: {}", self.line, self.message),
            ),
            "runtime" => ExecutionResult::failure_with_stdout(
                ExecErrorKind::RuntimeInGeneratedCode,
                format!("Execution error: {}", self.message),
                self.stdout,
            ),
            other => ExecutionResult::failure(
                ExecErrorKind::SandboxFailure,
                format!("unknown sandbox status: {}", other),
            ),
        }
    }
}

fn non_null(v: Value) -> Option<Value> {
    if v.is_null() {
        None
    } else {
        Some(v)
    }
}
