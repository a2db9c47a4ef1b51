//! The one result shape every command produces:
//! `{"success": true, "data": ...}` or `{"success": false, "error": "..."}`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::models::{ExecutionOutcome, RunRequest};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub exit_code: i32,
}

impl Report {
    pub fn success(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            error: None,
            exit_code: 0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            exit_code: 1,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Error reports for a failed library call, with a leading context such as
    /// "Failed to list images".
    pub fn failed(context: &str, err: &Error) -> Self {
        Self::error(format!("{}: {}", context, err))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| {
            // Only reachable if a payload holds a non-string map key.
            r#"{"success": false, "error": "unserialisable result"}"#.to_string()
        })
    }

    /// Successes go to stdout, errors to stderr.
    pub fn emit(&self) {
        if self.success {
            println!("{}", self.to_json());
        } else {
            eprintln!("{}", self.to_json());
        }
    }
}

/// Captured output follows the summary line, one log line per line.
fn with_logs(summary: String, logs: &[String]) -> String {
    if logs.is_empty() {
        summary
    } else {
        format!("{}\n{}", summary, logs.join("\n"))
    }
}

/// Maps a finished run onto the result shape. Identical outcomes always
/// produce identical reports.
pub fn run_report(request: &RunRequest, outcome: &ExecutionOutcome) -> Report {
    let report = match outcome {
        ExecutionOutcome::Completed {
            container_id,
            name,
            exit_code,
            logs,
        } => Report::success(json!({
            "container_id": container_id,
            "name": name,
            "status": "exited",
            "exit_code": exit_code,
            "image": request.image,
            "auto_remove": request.auto_remove,
            "logs": logs,
        })),
        ExecutionOutcome::Failed {
            container_id,
            exit_code,
            logs,
            engine_error,
            ..
        } => {
            let mut message = format!("Container {} exited with code {}", container_id, exit_code);
            if let Some(err) = engine_error {
                message.push_str(&format!(": {}", err));
            }
            Report::error(with_logs(message, logs))
        }
        ExecutionOutcome::TimedOut {
            container_id,
            elapsed,
            partial_logs,
            ..
        } => Report::error(with_logs(
            format!(
                "Container {} timed out after {}s",
                container_id,
                elapsed.as_secs_f64()
            ),
            partial_logs,
        )),
        ExecutionOutcome::PreconditionFailed { reason } => Report::error(reason.clone()),
        ExecutionOutcome::EngineError { message } => {
            Report::error(format!("Failed to run container: {}", message))
        }
    };
    report.with_exit_code(outcome.exit_status())
}
