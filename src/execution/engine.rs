//! Main execution engine - orchestrates the entire pipeline run

use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::core::{
    ExecutionStatus, Pipeline, RunContext, Stage, StageContext, StageState,
};
use crate::execution::{
    retry::{CancelFlag, RetryPolicy},
    runner::StepRunner,
    scheduler::{ExecutionScheduler, SchedulingStrategy},
    teardown::TeardownQueue,
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    StageStarted {
        stage: String,
    },
    StageSucceeded {
        stage: String,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    StepStarted {
        stage: String,
        step: String,
    },
    StepOutput {
        stage: String,
        step: String,
        output: String,
    },
    StepSkipped {
        stage: String,
        step: String,
    },
    StepFailed {
        stage: String,
        step: String,
        error: String,
    },
    TeardownStepFailed {
        stage: String,
        step: String,
        error: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Per-run options from the CLI surface
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Flush the teardown queue at run end (default true)
    pub run_teardown: bool,

    /// Whole-pipeline deadline; exceeding it cancels in-flight steps,
    /// skips unstarted stages, and still runs teardown
    pub deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_teardown: true,
            deadline: None,
        }
    }
}

/// Terminal result of a single stage execution
enum StageOutcome {
    Succeeded {
        outputs: HashMap<String, String>,
    },
    Failed {
        error: String,
        stderr: String,
    },
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    runner: StepRunner,
    scheduler: ExecutionScheduler,
    store: Arc<dyn ArtifactStore>,
    cancel: CancelFlag,
    teardown: Mutex<TeardownQueue>,
    event_handlers: std::sync::Mutex<Vec<EventHandler>>,
}

impl ExecutionEngine {
    pub fn new(
        runner: StepRunner,
        strategy: SchedulingStrategy,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            runner,
            scheduler: ExecutionScheduler::new(strategy),
            store,
            cancel: CancelFlag::new(),
            teardown: Mutex::new(TeardownQueue::new()),
            event_handlers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Cancellation flag shared with in-flight steps and retry waits
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        if let Ok(handlers) = self.event_handlers.lock() {
            for handler in handlers.iter() {
                handler(event.clone());
            }
        }
    }

    /// Execute the entire pipeline, then flush the teardown queue.
    ///
    /// The returned status is the pipeline outcome; teardown failures never
    /// change it.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut RunContext,
        options: &RunOptions,
    ) -> ExecutionStatus {
        let execution_id = pipeline.state.execution_id;
        info!(
            "starting pipeline '{}' ({})",
            pipeline.name, execution_id
        );
        self.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
        });

        pipeline.state.start(pipeline.stages.len());

        let status = match options.deadline {
            None => {
                self.run_stages(pipeline, ctx).await;
                pipeline.overall_status()
            }
            Some(deadline) => match timeout(deadline, self.run_stages(pipeline, ctx)).await {
                Ok(()) => pipeline.overall_status(),
                Err(_) => {
                    error!(
                        "pipeline deadline of {:?} exceeded, cancelling in-flight steps",
                        deadline
                    );
                    self.cancel.cancel();
                    self.apply_deadline(pipeline);
                    ExecutionStatus::Cancelled
                }
            },
        };

        pipeline.update_counts();
        pipeline.state.finish(status);

        if options.run_teardown {
            let failures = self.teardown.lock().await.flush(&self.runner).await;
            for failure in failures {
                self.emit(ExecutionEvent::TeardownStepFailed {
                    stage: failure.stage,
                    step: failure.step,
                    error: failure.error,
                });
            }
        } else if !self.teardown.lock().await.is_empty() {
            info!("teardown disabled, leaving queued actions unexecuted");
        }

        info!("pipeline '{}' finished: {:?}", pipeline.name, status);
        self.emit(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });

        status
    }

    /// Main scheduling loop: pick ready batches and run them to completion
    async fn run_stages(&self, pipeline: &mut Pipeline, ctx: &mut RunContext) {
        loop {
            for (stage, reason) in pipeline.propagate_skips() {
                self.emit(ExecutionEvent::StageSkipped { stage, reason });
            }

            if pipeline.is_complete() {
                return;
            }

            let batch = self.scheduler.next_batch(pipeline);
            if batch.is_empty() {
                // Unreachable with a validated DAG, but never spin
                warn!("no runnable stages although the pipeline is incomplete");
                for name in pipeline.execution_order().to_vec() {
                    if let Some(stage) = pipeline.stage_mut(&name) {
                        if matches!(stage.state, StageState::Pending) {
                            stage.state = StageState::Skipped {
                                reason: "stage was never runnable".to_string(),
                            };
                            self.emit(ExecutionEvent::StageSkipped {
                                stage: name.clone(),
                                reason: "stage was never runnable".to_string(),
                            });
                        }
                    }
                }
                return;
            }

            // Mark the batch running, snapshot contexts, queue teardown
            let mut jobs = Vec::new();
            for name in &batch {
                if let Some(stage) = pipeline.stage_mut(name) {
                    stage.state = StageState::Running {
                        started_at: Utc::now(),
                    };
                    let snapshot = ctx.snapshot_for_stage(stage);
                    self.emit(ExecutionEvent::StageStarted {
                        stage: name.clone(),
                    });
                    if !stage.teardown.is_empty() {
                        self.teardown.lock().await.register(
                            name,
                            &stage.teardown,
                            snapshot.clone(),
                        );
                    }
                    jobs.push((stage.clone(), snapshot));
                }
            }

            // Stages with no ordering dependency between them run
            // concurrently; steps inside each stage stay sequential.
            let results = futures::future::join_all(jobs.into_iter().map(
                |(stage, snapshot)| async move {
                    let name = stage.name.clone();
                    let outcome = self.run_stage(&stage, &snapshot).await;
                    (name, outcome)
                },
            ))
            .await;

            for (name, outcome) in results {
                self.apply_outcome(pipeline, ctx, &name, outcome);
            }

            pipeline.update_counts();
        }
    }

    /// Record a stage outcome and, on success, make its outputs visible
    /// to downstream stages. Outputs are published exactly here, so
    /// dependents never observe partial results.
    fn apply_outcome(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut RunContext,
        name: &str,
        outcome: StageOutcome,
    ) {
        let Some(stage) = pipeline.stage_mut(name) else {
            return;
        };
        let started_at = match &stage.state {
            StageState::Running { started_at } => *started_at,
            _ => Utc::now(),
        };

        match outcome {
            StageOutcome::Succeeded { outputs } => {
                ctx.publish_outputs(name, outputs.clone());
                stage.state = StageState::Succeeded {
                    outputs,
                    started_at,
                    completed_at: Utc::now(),
                };
                info!("stage '{}' succeeded", name);
                self.emit(ExecutionEvent::StageSucceeded {
                    stage: name.to_string(),
                });
            }
            StageOutcome::Failed { error, stderr } => {
                stage.state = StageState::Failed {
                    error: error.clone(),
                    stderr,
                    started_at,
                    failed_at: Utc::now(),
                };
                error!("stage '{}' failed: {}", name, error);
                self.emit(ExecutionEvent::StageFailed {
                    stage: name.to_string(),
                    error,
                });
            }
        }
    }

    /// Execute one stage: materialize input artifacts, run steps in order,
    /// then publish declared outputs and artifacts.
    async fn run_stage(&self, stage: &Stage, ctx: &StageContext) -> StageOutcome {
        if let Err(error) = self.materialize_inputs(stage, ctx).await {
            return StageOutcome::Failed {
                error,
                stderr: String::new(),
            };
        }

        let mut failed_steps: Vec<String> = Vec::new();
        let mut first_failure: Option<(String, String)> = None;
        let mut outputs: HashMap<String, String> = HashMap::new();

        for step in &stage.steps {
            if !step.condition.should_run(&failed_steps) {
                self.emit(ExecutionEvent::StepSkipped {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                });
                continue;
            }

            self.emit(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
            });

            let result = match &step.retry {
                Some(spec) => {
                    let policy = RetryPolicy::from_spec(spec);
                    let runner = self.runner.clone();
                    let step_for_retry = step.clone();
                    let ctx_for_retry = ctx.clone();
                    policy
                        .run(
                            move || {
                                let runner = runner.clone();
                                let step = step_for_retry.clone();
                                let ctx = ctx_for_retry.clone();
                                async move { runner.execute(&step, &ctx).await }
                            },
                            &self.cancel,
                        )
                        .await
                }
                None => self.runner.execute(step, ctx).await,
            };

            match result {
                Ok(outcome) => {
                    if !outcome.stdout.trim().is_empty() {
                        self.emit(ExecutionEvent::StepOutput {
                            stage: stage.name.clone(),
                            step: step.name.clone(),
                            output: ctx.mask(outcome.stdout.trim_end()),
                        });
                    }
                    if outcome.success {
                        // Published outputs are masked like stdout and stderr.
                        outputs.extend(
                            outcome
                                .outputs
                                .into_iter()
                                .map(|(key, value)| (key, ctx.mask(&value))),
                        );
                    } else {
                        let stderr = ctx.mask(outcome.stderr.trim());
                        self.emit(ExecutionEvent::StepFailed {
                            stage: stage.name.clone(),
                            step: step.name.clone(),
                            error: stderr.clone(),
                        });
                        if first_failure.is_none() {
                            let error = match stderr.lines().next().filter(|l| !l.trim().is_empty())
                            {
                                Some(line) => format!("step '{}' failed: {}", step.name, line),
                                None => format!("step '{}' failed", step.name),
                            };
                            first_failure = Some((error, stderr));
                        }
                        failed_steps.push(step.name.clone());
                    }
                }
                Err(e) => {
                    self.emit(ExecutionEvent::StepFailed {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                        error: e.to_string(),
                    });
                    if first_failure.is_none() {
                        first_failure =
                            Some((format!("step '{}': {}", step.name, e), String::new()));
                    }
                    failed_steps.push(step.name.clone());
                }
            }
        }

        if let Some((error, stderr)) = first_failure {
            return StageOutcome::Failed { error, stderr };
        }

        if let Some(missing) = stage
            .declared_outputs
            .iter()
            .find(|key| !outputs.contains_key(*key))
        {
            return StageOutcome::Failed {
                error: format!("stage did not publish declared output '{}'", missing),
                stderr: String::new(),
            };
        }

        if let Err(error) = self.publish_artifacts(stage, ctx).await {
            return StageOutcome::Failed {
                error,
                stderr: String::new(),
            };
        }

        StageOutcome::Succeeded { outputs }
    }

    /// Fetch declared input artifacts into the working tree
    async fn materialize_inputs(&self, stage: &Stage, ctx: &StageContext) -> Result<(), String> {
        for input in &stage.inputs {
            let reference = ArtifactRef::new(&input.name);
            let data = self
                .store
                .get(&reference, &stage.name)
                .await
                .map_err(|e| format!("failed to fetch artifact '{}': {}", input.name, e))?;

            let path = ctx.interpolate(&input.path);
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| format!("failed to create '{}': {}", parent.display(), e))?;
                }
            }
            tokio::fs::write(&path, data.as_slice())
                .await
                .map_err(|e| format!("failed to write artifact to '{}': {}", path, e))?;
        }
        Ok(())
    }

    /// Store declared artifact files produced by a succeeded stage
    async fn publish_artifacts(&self, stage: &Stage, ctx: &StageContext) -> Result<(), String> {
        for artifact in &stage.artifacts {
            let path = ctx.interpolate(&artifact.path);
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("failed to read artifact file '{}': {}", path, e))?;
            self.store
                .put(&artifact.name, data, &stage.name)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Deadline exceeded: fail what was running, skip what never started
    fn apply_deadline(&self, pipeline: &mut Pipeline) {
        let names = pipeline.execution_order().to_vec();
        for name in names {
            let Some(stage) = pipeline.stage_mut(&name) else {
                continue;
            };
            match &stage.state {
                StageState::Running { started_at } => {
                    let started_at = *started_at;
                    stage.state = StageState::Failed {
                        error: "cancelled: pipeline deadline exceeded".to_string(),
                        stderr: String::new(),
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.emit(ExecutionEvent::StageFailed {
                        stage: name.clone(),
                        error: "cancelled: pipeline deadline exceeded".to_string(),
                    });
                }
                StageState::Pending => {
                    stage.state = StageState::Skipped {
                        reason: "pipeline deadline exceeded".to_string(),
                    };
                    self.emit(ExecutionEvent::StageSkipped {
                        stage: name.clone(),
                        reason: "pipeline deadline exceeded".to_string(),
                    });
                }
                _ => {}
            }
        }
    }
}
