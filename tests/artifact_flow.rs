//! Test: artifact hand-off between stages through the in-memory store

mod helpers;

use helpers::*;

use conveyor::core::{ExecutionStatus, StageState};

/// A file published by a build stage materializes for its dependents
#[tokio::test]
async fn test_artifact_flows_downstream() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "artifacts"
stages:
  - name: "build"
    artifacts:
      - name: "bundle"
        path: "{dir}/out/app.tar"
    steps:
      - name: "package"
        run: "mkdir -p {dir}/out && echo payload-bytes > {dir}/out/app.tar"

  - name: "deploy"
    needs: ["build"]
    inputs:
      - name: "bundle"
        path: "{dir}/incoming/app.tar"
    steps:
      - name: "inspect"
        run: "grep -q payload-bytes {dir}/incoming/app.tar"
"#,
        dir = dir.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert_stage_succeeded(&result, "build");
    assert_stage_succeeded(&result, "deploy");

    let fetched = std::fs::read_to_string(dir.join("incoming/app.tar")).unwrap();
    assert_eq!(fetched, "payload-bytes\n");
}

/// A declared artifact whose file was never produced fails the stage
#[tokio::test]
async fn test_missing_artifact_file_fails_stage() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "artifacts"
stages:
  - name: "build"
    artifacts:
      - name: "bundle"
        path: "{dir}/out/app.tar"
    steps:
      - name: "package"
        run: "true"
"#,
        dir = dir.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let StageState::Failed { error, .. } = &result.pipeline.stage("build").unwrap().state else {
        panic!("build should be failed");
    };
    assert!(error.contains("app.tar"), "unexpected error: {}", error);
}

/// Artifact paths are interpolated against the stage environment
#[tokio::test]
async fn test_artifact_path_interpolation() {
    let dir = scratch_dir();
    let yaml = format!(
        r#"
name: "artifacts"
env:
  workdir: "{dir}"
stages:
  - name: "build"
    outputs: [version]
    artifacts:
      - name: "bundle"
        path: "${{env.workdir}}/app.tar"
    steps:
      - name: "package"
        run: "echo v9 > ${{env.workdir}}/app.tar; echo version=9"
        outputs: [version]

  - name: "deploy"
    needs: ["build"]
    inputs:
      - name: "bundle"
        path: "${{env.workdir}}/fetched-${{stage.build.outputs.version}}.tar"
    steps:
      - name: "inspect"
        run: "grep -q v9 ${{env.workdir}}/fetched-9.tar"
"#,
        dir = dir.display()
    );

    let result = run_yaml(&yaml).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert!(dir.join("fetched-9.tar").exists());
}
