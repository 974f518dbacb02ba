//! External-program work function
//!
//! Runs one child process per subject. `{subject}` in the program arguments is
//! replaced with the subject; task params are passed as JSON in
//! `FLIGHTDECK_PARAMS`. Exit status 0 is success and stdout becomes the unit
//! data (parsed as JSON when it is valid JSON, kept as text otherwise).

use crate::models::TaskParams;
use crate::normalize::ResultValue;
use crate::work::{UnitError, UnitResult, WorkFn};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub const SUBJECT_PLACEHOLDER: &str = "{subject}";
pub const PARAMS_ENV_VAR: &str = "FLIGHTDECK_PARAMS";

/// Work function backed by an external program
#[derive(Debug, Clone)]
pub struct CommandWork {
    program: String,
    args: Vec<String>,
}

impl CommandWork {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a `program arg...` command line as given on the CLI
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for one subject
    pub fn args_for(&self, subject: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(SUBJECT_PLACEHOLDER, subject))
            .collect()
    }
}

#[async_trait]
impl WorkFn for CommandWork {
    async fn run(&self, subject: &str, params: &TaskParams) -> UnitResult {
        let args = self.args_for(subject);
        let params_json = serde_json::to_string(params).map_err(|e| UnitError::new(e.to_string()))?;

        debug!(program = %self.program, ?args, subject, "Spawning unit process");

        // Dropping the future on timeout or cancellation must not leave the child behind
        let output = Command::new(&self.program)
            .args(&args)
            .env(PARAMS_ENV_VAR, params_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| UnitError::new(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let status = match output.status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            };
            return Err(if stderr.is_empty() {
                UnitError::new(status)
            } else {
                UnitError::new(format!("{}: {}", status, stderr))
            });
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_stdout(stdout: &str) -> ResultValue {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return ResultValue::Null;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => ResultValue::Json(value),
        Err(_) => ResultValue::Text(trimmed.to_string()),
    }
}
