//! Teardown queue - best-effort cleanup in reverse registration order
//!
//! Stages that create external resources register their teardown steps the
//! moment they start running. The queue is flushed after the pipeline's
//! terminal state is reached, success or failure alike; teardown failures
//! are reported but never override the already-determined outcome.

use crate::core::{StageContext, Step};
use crate::execution::runner::StepRunner;
use tracing::{info, warn};

/// A cleanup action captured with the context its stage ran under
#[derive(Clone)]
pub struct TeardownAction {
    pub stage: String,
    pub step: Step,
    pub ctx: StageContext,
}

/// A teardown step that did not succeed
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    pub stage: String,
    pub step: String,
    pub error: String,
}

/// Ordered list of cleanup actions, flushed last-registered-first
#[derive(Default)]
pub struct TeardownQueue {
    actions: Vec<TeardownAction>,
}

impl TeardownQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stage's teardown steps. Steps stay in declaration order
    /// within the stage; stages unwind in reverse.
    pub fn register(&mut self, stage: &str, steps: &[Step], ctx: StageContext) {
        for step in steps {
            self.actions.push(TeardownAction {
                stage: stage.to_string(),
                step: step.clone(),
                ctx: ctx.clone(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Execute all queued actions in reverse registration order.
    /// Best-effort: every action runs regardless of earlier failures.
    pub async fn flush(&mut self, runner: &StepRunner) -> Vec<TeardownFailure> {
        let actions = std::mem::take(&mut self.actions);
        if actions.is_empty() {
            return Vec::new();
        }

        info!("flushing {} teardown action(s)", actions.len());
        let mut failures = Vec::new();

        for action in actions.into_iter().rev() {
            let result = runner.execute(&action.step, &action.ctx).await;
            let error = match result {
                Ok(outcome) if outcome.success => None,
                Ok(outcome) => Some(action.ctx.mask(outcome.stderr.trim())),
                Err(e) => Some(e.to_string()),
            };

            if let Some(error) = error {
                warn!(
                    "teardown step '{}' of stage '{}' failed: {}",
                    action.step.name, action.stage, error
                );
                failures.push(TeardownFailure {
                    stage: action.stage,
                    step: action.step.name.clone(),
                    error,
                });
            }
        }

        failures
    }
}
