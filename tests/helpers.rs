//! Test utility functions for conveyor

use conveyor::artifact::MemoryArtifactStore;
use conveyor::collab::CollaboratorRegistry;
use conveyor::core::config::PipelineConfig;
use conveyor::core::{ExecutionStatus, Pipeline, RunContext, StageState};
use conveyor::execution::{
    ExecutionEngine, ExecutionEvent, RunOptions, SchedulingStrategy, StepRunner,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Everything a test needs to assert on after a run
pub struct RunResult {
    pub status: ExecutionStatus,
    pub pipeline: Pipeline,
    pub ctx: RunContext,
    pub events: Vec<ExecutionEvent>,
}

/// Run a pipeline definition with defaults: no vars, no secrets,
/// parallel scheduling, teardown on.
pub async fn run_yaml(yaml: &str) -> RunResult {
    run_yaml_with(
        yaml,
        HashMap::new(),
        HashMap::new(),
        RunOptions::default(),
        SchedulingStrategy::Parallel,
    )
    .await
}

pub async fn run_yaml_with(
    yaml: &str,
    vars: HashMap<String, String>,
    secrets: HashMap<String, String>,
    options: RunOptions,
    strategy: SchedulingStrategy,
) -> RunResult {
    let config = PipelineConfig::from_yaml(yaml).expect("definition should be valid");
    config
        .check_secrets(&secrets)
        .expect("all declared secrets should be provided");

    let mut merged = config.env.clone();
    merged.extend(vars);

    let mut pipeline = config.to_pipeline();
    let mut ctx = RunContext::new(merged, secrets);

    let registry = Arc::new(CollaboratorRegistry::from_config(&config.collaborators));
    let store = Arc::new(MemoryArtifactStore::new(pipeline.transitive_needs()));
    let engine = ExecutionEngine::new(StepRunner::new(registry), strategy, store);

    let events: Arc<Mutex<Vec<ExecutionEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| {
        sink.lock().unwrap().push(event);
    });

    let status = engine.execute(&mut pipeline, &mut ctx, &options).await;
    let events = events.lock().unwrap().clone();

    RunResult {
        status,
        pipeline,
        ctx,
        events,
    }
}

/// Fresh scratch directory for tests that touch the filesystem
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("conveyor-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}

pub fn assert_stage_succeeded(result: &RunResult, name: &str) {
    let stage = result.pipeline.stage(name).expect("stage should exist");
    assert!(
        matches!(stage.state, StageState::Succeeded { .. }),
        "expected stage '{}' to succeed, was {}",
        name,
        stage.state.label()
    );
}

pub fn assert_stage_failed(result: &RunResult, name: &str) {
    let stage = result.pipeline.stage(name).expect("stage should exist");
    assert!(
        matches!(stage.state, StageState::Failed { .. }),
        "expected stage '{}' to fail, was {}",
        name,
        stage.state.label()
    );
}

pub fn assert_stage_skipped(result: &RunResult, name: &str) {
    let stage = result.pipeline.stage(name).expect("stage should exist");
    assert!(
        matches!(stage.state, StageState::Skipped { .. }),
        "expected stage '{}' to be skipped, was {}",
        name,
        stage.state.label()
    );
}

/// Stage names in the order they started
pub fn started_stages(result: &RunResult) -> Vec<String> {
    result
        .events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StageStarted { stage } => Some(stage.clone()),
            _ => None,
        })
        .collect()
}

/// Step names (stage/step) in the order they started
pub fn started_steps(result: &RunResult) -> Vec<String> {
    result
        .events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StepStarted { stage, step } => Some(format!("{}/{}", stage, step)),
            _ => None,
        })
        .collect()
}
