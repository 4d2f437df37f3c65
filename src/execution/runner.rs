//! Step runner - executes a single step as a subprocess or HTTP call
//!
//! The runner never retries; retry is the caller's responsibility through
//! `RetryPolicy`. A non-zero exit or unexpected HTTP status is a logical
//! step failure (`Outcome { success: false, .. }`); a spawn failure or an
//! unreachable host is an infrastructure error and surfaces as `Err`.

use crate::collab::CollaboratorRegistry;
use crate::core::{StageContext, Step, StepKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Error types for step execution
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The step could not be attempted at all: spawn failure, unreachable
    /// host. Never silently treated as "the tool said no".
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,
}

/// Result of one step execution
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// False on non-zero exit or unexpected HTTP status
    pub success: bool,

    /// Declared output keys populated by this execution
    pub outputs: HashMap<String, String>,

    /// Captured stdout (or HTTP response body)
    pub stdout: String,

    /// Captured stderr (or HTTP status line on failure)
    pub stderr: String,

    /// Wall-clock duration of the execution
    pub duration: Duration,
}

/// Run a program to completion with a timeout, capturing stdio.
///
/// Shared by subprocess steps and collaborator adapters.
pub async fn run_command(
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
    time_limit: Duration,
) -> Result<Outcome, RunnerError> {
    debug!("spawning '{}' with {} args", program, args.len());
    let started = Instant::now();

    let result = timeout(
        time_limit,
        Command::new(program)
            .args(args)
            .envs(env)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| RunnerError::Timeout(time_limit.as_secs()))?;

    let output = result
        .map_err(|e| RunnerError::Infrastructure(format!("failed to spawn '{}': {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        warn!("'{}' exited with code {}", program, exit_code);
    }

    Ok(Outcome {
        success: output.status.success(),
        outputs: HashMap::new(),
        stdout,
        stderr,
        duration: started.elapsed(),
    })
}

/// Parse declared output keys from `key=value` stdout lines
fn parse_outputs(stdout: &str, declared: &[String]) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if declared.iter().any(|d| d == key) {
                outputs.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    outputs
}

/// Executes a single step against an immutable stage context snapshot
#[derive(Clone)]
pub struct StepRunner {
    http: reqwest::Client,
    collaborators: Arc<CollaboratorRegistry>,
}

impl StepRunner {
    pub fn new(collaborators: Arc<CollaboratorRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            collaborators,
        }
    }

    /// Execute a step once. Never retries internally.
    pub async fn execute(&self, step: &Step, ctx: &StageContext) -> Result<Outcome, RunnerError> {
        debug!("executing step '{}' in stage '{}'", step.name, ctx.stage_name);

        let mut outcome = match &step.kind {
            StepKind::Subprocess { command } => {
                let command = ctx.interpolate(command);
                let args = vec!["-c".to_string(), command];
                run_command("sh", &args, &ctx.env, step.timeout).await?
            }
            StepKind::Http {
                method,
                url,
                body,
                expect_status,
            } => {
                self.execute_http(
                    method,
                    &ctx.interpolate(url),
                    body.as_deref().map(|b| ctx.interpolate(b)),
                    *expect_status,
                    step.timeout,
                )
                .await?
            }
            StepKind::Collaborator { name, with } => {
                let collaborator = self.collaborators.get(name).ok_or_else(|| {
                    RunnerError::Infrastructure(format!("collaborator '{}' is not configured", name))
                })?;
                collaborator.invoke(with, ctx, step.timeout).await?
            }
        };

        if outcome.success {
            outcome.outputs = parse_outputs(&outcome.stdout, &step.outputs);

            // A declared output the step never printed is a step failure,
            // caught here so dependents never see a partial output map.
            if let Some(missing) = step.outputs.iter().find(|k| !outcome.outputs.contains_key(*k))
            {
                outcome.success = false;
                outcome.stderr = format!("did not produce declared output '{}'", missing);
            }
        }

        Ok(outcome)
    }

    async fn execute_http(
        &self,
        method: &str,
        url: &str,
        body: Option<String>,
        expect_status: Option<u16>,
        time_limit: Duration,
    ) -> Result<Outcome, RunnerError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| RunnerError::Infrastructure(format!("invalid HTTP method '{}'", method)))?;

        let started = Instant::now();
        let mut request = self.http.request(method, url).timeout(time_limit);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(RunnerError::Timeout(time_limit.as_secs()));
            }
            Err(e) => {
                return Err(RunnerError::Infrastructure(format!(
                    "request to {} failed: {}",
                    url, e
                )));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let success = match expect_status {
            Some(expected) => status.as_u16() == expected,
            None => status.is_success(),
        };

        Ok(Outcome {
            success,
            outputs: HashMap::new(),
            stdout: body,
            stderr: if success {
                String::new()
            } else {
                format!("unexpected status {} from {}", status, url)
            },
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::StepCondition;

    fn subprocess_step(command: &str, outputs: Vec<String>) -> Step {
        Step {
            name: "test".to_string(),
            kind: StepKind::Subprocess {
                command: command.to_string(),
            },
            condition: StepCondition::OnSuccess,
            outputs,
            timeout: Duration::from_secs(10),
            retry: None,
        }
    }

    fn runner() -> StepRunner {
        StepRunner::new(Arc::new(CollaboratorRegistry::default()))
    }

    #[tokio::test]
    async fn test_subprocess_success() {
        let step = subprocess_step("echo hello", vec![]);
        let outcome = runner()
            .execute(&step, &StageContext::empty("build"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_subprocess_nonzero_exit_is_logical_failure() {
        let step = subprocess_step("echo oops >&2; exit 3", vec![]);
        let outcome = runner()
            .execute(&step, &StageContext::empty("build"))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_infrastructure_error() {
        let result = run_command(
            "definitely-not-a-real-binary",
            &[],
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(RunnerError::Infrastructure(_))));
    }

    #[tokio::test]
    async fn test_subprocess_timeout() {
        let step = Step {
            timeout: Duration::from_millis(100),
            ..subprocess_step("sleep 5", vec![])
        };
        let result = runner().execute(&step, &StageContext::empty("build")).await;

        assert!(matches!(result, Err(RunnerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_declared_outputs_parsed() {
        let step = subprocess_step(
            "echo building; echo artifact_name=app.bin",
            vec!["artifact_name".to_string()],
        );
        let outcome = runner()
            .execute(&step, &StageContext::empty("build"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(
            outcome.outputs.get("artifact_name"),
            Some(&"app.bin".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails_step() {
        let step = subprocess_step("echo nothing useful", vec!["artifact_name".to_string()]);
        let outcome = runner()
            .execute(&step, &StageContext::empty("build"))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.stderr.contains("artifact_name"));
    }

    #[test]
    fn test_parse_outputs_ignores_undeclared_keys() {
        let outputs = parse_outputs(
            "noise\nimage_ref=registry/app:sha123\nother=value\n",
            &["image_ref".to_string()],
        );
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs.get("image_ref"),
            Some(&"registry/app:sha123".to_string())
        );
    }
}
