use std::io::Write;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::NamedTempFile;

use askdata::exec::{CodeExecutor, ExecErrorKind, PythonExecutor};

const PYTHON: &str = "python3";

fn python_available() -> bool {
    std::process::Command::new(PYTHON)
        .arg("--version")
        .output()
        .is_ok()
}

fn sample_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .unwrap();
    writeln!(file, "region,revenue").unwrap();
    writeln!(file, "north,100").unwrap();
    writeln!(file, "south,250").unwrap();
    file
}

fn executor() -> PythonExecutor {
    PythonExecutor::new(PYTHON, Duration::from_secs(30))
}

#[tokio::test]
async fn captures_stdout_exactly() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let result = executor()
        .execute(
            "print(\"hello\")\nprint(42)\nresult = 7",
            "stdout check",
            csv.path().to_str().unwrap(),
        )
        .await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.stdout, "hello\n42\n");
    assert_eq!(result.result, Some(json!(7)));
}

#[tokio::test]
async fn exposes_the_bound_filename() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let path = csv.path().to_str().unwrap().to_string();
    let result = executor()
        .execute("result = filename", "filename binding", &path)
        .await;

    assert!(result.success);
    assert_eq!(result.result, Some(json!(path)));
}

#[tokio::test]
async fn classifies_syntax_errors_with_line_number() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let result = executor()
        .execute("def broken(:", "syntax check", csv.path().to_str().unwrap())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ExecErrorKind::SyntaxInGeneratedCode));
    let error = result.error.unwrap();
    assert!(error.contains("line 1"), "missing line number: {}", error);
}

#[tokio::test]
async fn classifies_runtime_errors_and_keeps_stdout() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let result = executor()
        .execute(
            "print(\"before\")\nresult = 1/0",
            "runtime check",
            csv.path().to_str().unwrap(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ExecErrorKind::RuntimeInGeneratedCode));
    assert!(result.error.unwrap().contains("division by zero"));
    assert_eq!(result.stdout, "before\n");
}

#[tokio::test]
async fn times_out_and_returns_promptly() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let exec = PythonExecutor::new(PYTHON, Duration::from_secs(2));

    let started = Instant::now();
    let result = exec
        .execute(
            "while True:\n    pass",
            "timeout check",
            csv.path().to_str().unwrap(),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ExecErrorKind::ExecutionTimeout));
    assert!(result.stdout.is_empty(), "stdout is discarded on timeout");
    assert!(
        elapsed < Duration::from_secs(10),
        "took too long: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn missing_dataset_short_circuits() {
    // No interpreter involved: the check happens before any code runs.
    let result = executor()
        .execute("result = 1", "precondition", "/definitely/missing.csv")
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ExecErrorKind::DatasetNotFound));
    assert!(result.error.unwrap().contains("/definitely/missing.csv"));
}

#[tokio::test]
async fn returns_plot_spec_binding() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let code = "rows = [1, 2, 3]\n\
                plot_spec = {\"data\": [{\"type\": \"bar\", \"x\": [\"a\", \"b\", \"c\"], \"y\": rows}], \"layout\": {\"title\": {\"text\": \"demo\"}}}\n\
                result = {\"total\": sum(rows)}";
    let result = executor()
        .execute(code, "plot check", csv.path().to_str().unwrap())
        .await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    let plot = result.plot_spec.unwrap();
    assert_eq!(plot["data"][0]["type"], "bar");
    assert_eq!(result.result.unwrap()["total"], json!(6));
}

#[tokio::test]
async fn sanitizes_non_finite_floats() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let result = executor()
        .execute(
            "result = {\"nan\": float(\"nan\"), \"ok\": 1.5}",
            "nan check",
            csv.path().to_str().unwrap(),
        )
        .await;

    assert!(result.success);
    let value = result.result.unwrap();
    assert_eq!(value["nan"], json!(null));
    assert_eq!(value["ok"], json!(1.5));
}

#[tokio::test]
async fn blocks_symbols_outside_the_allow_list() {
    if !python_available() {
        println!("Warning: {} not found, skipping", PYTHON);
        return;
    }
    let csv = sample_csv();
    let result = executor()
        .execute(
            "result = open(filename).read()",
            "sandbox check",
            csv.path().to_str().unwrap(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ExecErrorKind::RuntimeInGeneratedCode));
    assert!(result.error.unwrap().contains("NameError"));
}
