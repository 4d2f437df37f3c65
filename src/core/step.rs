//! Step domain model

use crate::core::config::{HttpRequestConfig, RetryConfig, StepConfig};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single step within a stage
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, unique within the stage
    pub name: String,

    /// What the step executes
    pub kind: StepKind,

    /// Predicate over prior step outcomes in the *current* stage only.
    /// Cross-stage sequencing is expressed through `needs`, never here.
    pub condition: StepCondition,

    /// Output keys this step populates
    pub outputs: Vec<String>,

    /// Timeout for a single execution
    pub timeout: Duration,

    /// Retry policy, when the step opts into one
    pub retry: Option<RetrySpec>,
}

/// The executable payload of a step
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Shell command run as a subprocess
    Subprocess { command: String },

    /// HTTP request
    Http {
        method: String,
        url: String,
        body: Option<String>,
        expect_status: Option<u16>,
    },

    /// Invocation of a named external collaborator with parameters
    Collaborator {
        name: String,
        with: BTreeMap<String, String>,
    },
}

/// When a step runs, relative to earlier steps in its stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCondition {
    /// Run only while no prior step has failed (the default)
    OnSuccess,
    /// Run regardless of prior outcomes
    Always,
    /// Run only after some prior step failed
    OnFailure,
    /// Run only after the named prior step failed
    OnFailureOf(String),
}

impl StepCondition {
    fn parse(condition: Option<&str>) -> Self {
        match condition {
            None | Some("on-success") => StepCondition::OnSuccess,
            Some("always") => StepCondition::Always,
            Some("on-failure") => StepCondition::OnFailure,
            Some(other) => match other.strip_prefix("on-failure-of:") {
                Some(target) => StepCondition::OnFailureOf(target.to_string()),
                // Unreachable after validation; treat as the default
                None => StepCondition::OnSuccess,
            },
        }
    }

    /// Evaluate against the names of prior steps in this stage that failed
    pub fn should_run(&self, failed_steps: &[String]) -> bool {
        match self {
            StepCondition::OnSuccess => failed_steps.is_empty(),
            StepCondition::Always => true,
            StepCondition::OnFailure => !failed_steps.is_empty(),
            StepCondition::OnFailureOf(target) => failed_steps.iter().any(|s| s == target),
        }
    }
}

/// Bounded retry-with-delay settings for a single step
#[derive(Debug, Clone)]
pub struct RetrySpec {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Non-busy wait between failed attempts
    pub delay_between: Duration,

    /// Per-attempt timeout; the step timeout applies when unset
    pub attempt_timeout: Option<Duration>,
}

impl RetrySpec {
    fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay_between: Duration::from_secs(config.delay_secs),
            attempt_timeout: config.attempt_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Step {
    /// Create a step from its config entry
    pub fn from_config(config: &StepConfig, default_timeout_secs: u64) -> Self {
        let kind = if let Some(command) = &config.run {
            StepKind::Subprocess {
                command: command.clone(),
            }
        } else if let Some(http) = &config.http {
            let HttpRequestConfig {
                method,
                url,
                body,
                expect_status,
            } = http.clone();
            StepKind::Http {
                method,
                url,
                body,
                expect_status,
            }
        } else {
            // Validation guarantees `uses` is present when run/http are not
            StepKind::Collaborator {
                name: config.uses.clone().unwrap_or_default(),
                with: config.with.clone(),
            }
        };

        Step {
            name: config.name.clone(),
            kind,
            condition: StepCondition::parse(config.condition.as_deref()),
            outputs: config.outputs.clone(),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(default_timeout_secs)),
            retry: config.retry.as_ref().map(RetrySpec::from_config),
        }
    }
}
