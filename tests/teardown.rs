//! Test: teardown queue - reverse order, best effort, deadline survival

mod helpers;

use helpers::*;

use conveyor::core::ExecutionStatus;
use conveyor::execution::{ExecutionEvent, RunOptions, SchedulingStrategy};
use std::collections::HashMap;
use std::time::Duration;

/// Teardown runs for every started stage, newest first, even on success
#[tokio::test]
async fn test_teardown_runs_in_reverse_order() {
    let dir = scratch_dir();
    let log = dir.join("teardown.log");
    let yaml = format!(
        r#"
name: "cleanup"
stages:
  - name: "provision"
    teardown:
      - name: "drop-env"
        run: "echo drop-env >> {log}"
    steps: [{{ name: "up", run: "true" }}]
  - name: "deploy"
    needs: ["provision"]
    teardown:
      - name: "undeploy"
        run: "echo undeploy >> {log}"
    steps: [{{ name: "rollout", run: "true" }}]
"#,
        log = log.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    let contents = std::fs::read_to_string(&log).unwrap();
    assert_eq!(contents, "undeploy\ndrop-env\n");
}

/// One failing teardown action never stops the others, and never changes
/// the pipeline outcome.
#[tokio::test]
async fn test_teardown_is_best_effort() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "cleanup"
stages:
  - name: "provision"
    teardown:
      - name: "drop-env"
        run: "touch {dir}/dropped"
    steps: [{{ name: "up", run: "true" }}]
  - name: "deploy"
    needs: ["provision"]
    teardown:
      - name: "undeploy"
        run: "echo broken cleanup >&2; exit 1"
    steps: [{{ name: "rollout", run: "true" }}]
"#,
        dir = dir.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert!(dir.join("dropped").exists());

    let teardown_failures: Vec<_> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::TeardownStepFailed { stage, step, .. } => {
                Some(format!("{}/{}", stage, step))
            }
            _ => None,
        })
        .collect();
    assert_eq!(teardown_failures, vec!["deploy/undeploy"]);
}

/// Teardown is registered only for stages that actually started
#[tokio::test]
async fn test_skipped_stage_has_no_teardown() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "cleanup"
stages:
  - name: "build"
    steps: [{{ name: "broken", run: "exit 1" }}]
  - name: "deploy"
    needs: ["build"]
    teardown:
      - name: "undeploy"
        run: "touch {dir}/undeploy"
    steps: [{{ name: "rollout", run: "true" }}]
"#,
        dir = dir.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_stage_skipped(&result, "deploy");
    assert!(!dir.join("undeploy").exists());
}

/// --teardown false leaves queued actions unexecuted
#[tokio::test]
async fn test_teardown_can_be_disabled() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "cleanup"
stages:
  - name: "provision"
    teardown:
      - name: "drop-env"
        run: "touch {dir}/dropped"
    steps: [{{ name: "up", run: "true" }}]
"#,
        dir = dir.display()
    );

    let result = run_yaml_with(
        &yaml,
        HashMap::new(),
        HashMap::new(),
        RunOptions {
            run_teardown: false,
            deadline: None,
        },
        SchedulingStrategy::Parallel,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert!(!dir.join("dropped").exists());
}

/// Deadline expiry still flushes teardown for stages that had started
#[tokio::test]
async fn test_teardown_runs_after_deadline() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "cleanup"
stages:
  - name: "deploy"
    teardown:
      - name: "undeploy"
        run: "touch {dir}/undeploy"
    steps: [{{ name: "hang", run: "sleep 30" }}]
"#,
        dir = dir.display()
    );

    let result = run_yaml_with(
        &yaml,
        HashMap::new(),
        HashMap::new(),
        RunOptions {
            run_teardown: true,
            deadline: Some(Duration::from_millis(300)),
        },
        SchedulingStrategy::Parallel,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(dir.join("undeploy").exists());
}
