//! Pipeline definition loaded from YAML

use crate::core::context::stage_output_refs;
use crate::core::Pipeline;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// A malformed pipeline definition. Fatal: the pipeline never starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("stage '{stage}' has duplicate step name '{step}'")]
    DuplicateStep { stage: String, step: String },

    #[error("stage '{stage}' needs non-existent stage '{needs}'")]
    UnknownNeed { stage: String, needs: String },

    #[error("cycle detected in stage graph involving '{0}'")]
    Cycle(String),

    #[error("step '{step}' in stage '{stage}' must declare exactly one of run, http, uses")]
    AmbiguousStepKind { stage: String, step: String },

    #[error("step '{step}' in stage '{stage}' uses unknown collaborator '{name}'")]
    UnknownCollaborator {
        stage: String,
        step: String,
        name: String,
    },

    #[error("step '{step}' in stage '{stage}' declares output '{key}' not listed in the stage outputs")]
    StepOutputNotDeclared {
        stage: String,
        step: String,
        key: String,
    },

    #[error("step '{step}' in stage '{stage}' has invalid condition '{condition}'")]
    InvalidCondition {
        stage: String,
        step: String,
        condition: String,
    },

    #[error(
        "stage '{stage}' references output '{key}' of stage '{referenced}', \
         which is not declared by a stage in its transitive needs"
    )]
    UnknownOutputReference {
        stage: String,
        referenced: String,
        key: String,
    },

    #[error(
        "pipeline env references output '{key}' of stage '{referenced}', \
         which is not declared"
    )]
    UnknownEnvOutputReference { referenced: String, key: String },

    #[error("stage '{stage}' consumes artifact '{name}' not produced by any of its transitive needs")]
    UnknownInputArtifact { stage: String, name: String },

    #[error("stage '{stage}' declares secret '{name}' which was not provided")]
    MissingSecret { stage: String, name: String },
}

/// Top-level pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Pipeline-level environment, visible to every stage
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Defaults applied to steps that do not override them
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External collaborator bindings referenced by `uses:` steps
    #[serde(default)]
    pub collaborators: HashMap<String, CollaboratorConfig>,

    /// Pipeline stages
    pub stages: Vec<StageConfig>,
}

/// Global step defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default per-step timeout (in seconds)
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    300
}

/// A named external tool binding: a command template `uses:` steps invoke
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Program to execute
    pub command: String,

    /// Base arguments, before per-step `with:` parameters
    #[serde(default)]
    pub args: Vec<String>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Names of stages that must succeed before this one runs
    #[serde(default)]
    pub needs: Vec<String>,

    /// Stage-level environment; wins over pipeline-level on conflict
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Secret names injected into this stage's environment only
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Output keys this stage promises to publish on success
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Artifacts consumed from the store before steps run
    #[serde(default)]
    pub inputs: Vec<ArtifactBinding>,

    /// Artifacts published to the store after the stage succeeds
    #[serde(default)]
    pub artifacts: Vec<ArtifactBinding>,

    /// Ordered steps; strictly sequential within the stage
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Cleanup steps queued when this stage starts running
    #[serde(default)]
    pub teardown: Vec<StepConfig>,
}

/// A named artifact bound to a file path in the working tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBinding {
    pub name: String,
    pub path: String,
}

/// Step configuration as defined in YAML
///
/// Exactly one of `run`, `http`, `uses` selects the step kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within its stage
    pub name: String,

    /// Shell command (subprocess step)
    #[serde(default)]
    pub run: Option<String>,

    /// HTTP request (http-call step)
    #[serde(default)]
    pub http: Option<HttpRequestConfig>,

    /// Collaborator reference (external tool step)
    #[serde(default)]
    pub uses: Option<String>,

    /// Parameters passed to the collaborator as trailing `key=value` args
    #[serde(default)]
    pub with: BTreeMap<String, String>,

    /// When to run, relative to prior step outcomes in this stage:
    /// `on-success` (default), `always`, `on-failure`, `on-failure-of:<step>`
    #[serde(default)]
    pub condition: Option<String>,

    /// Output keys this step populates from `key=value` stdout lines
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Timeout for this step (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retry policy for transient readiness checks
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// HTTP request specification for an http-call step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    /// HTTP method (GET, POST, ...)
    #[serde(default = "default_http_method")]
    pub method: String,

    /// Request URL; supports `${...}` interpolation
    pub url: String,

    /// Optional request body
    #[serde(default)]
    pub body: Option<String>,

    /// Expected status code; any 2xx counts as success when unset
    #[serde(default)]
    pub expect_status: Option<u16>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// Bounded retry-with-delay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Non-busy wait between failed attempts (in seconds)
    #[serde(default)]
    pub delay_secs: u64,

    /// Per-attempt timeout; falls back to the step timeout when unset
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a pipeline definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ValidationError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the definition. Rejecting here guarantees no stage ever runs
    /// against a definition that could read undeclared outputs at runtime.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Stage name uniqueness
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.name) {
                return Err(ValidationError::DuplicateStage(stage.name.clone()));
            }
        }

        // `needs` references resolve
        let stage_names: HashSet<_> = self.stages.iter().map(|s| s.name.as_str()).collect();
        for stage in &self.stages {
            for dep in &stage.needs {
                if !stage_names.contains(dep.as_str()) {
                    return Err(ValidationError::UnknownNeed {
                        stage: stage.name.clone(),
                        needs: dep.clone(),
                    });
                }
            }
        }

        self.check_cycles()?;

        let closure = self.transitive_needs();

        // Pipeline-level env is merged into every stage snapshot, so an
        // output reference here must name an existing stage and a key that
        // stage declares.
        for value in self.env.values() {
            for (referenced, key) in stage_output_refs(value) {
                let declared = self
                    .stages
                    .iter()
                    .find(|s| s.name == referenced)
                    .map(|s| s.outputs.iter().any(|o| *o == key))
                    .unwrap_or(false);
                if !declared {
                    return Err(ValidationError::UnknownEnvOutputReference { referenced, key });
                }
            }
        }

        for stage in &self.stages {
            self.validate_stage(stage, &closure)?;
        }

        Ok(())
    }

    fn validate_stage(
        &self,
        stage: &StageConfig,
        closure: &HashMap<String, HashSet<String>>,
    ) -> Result<(), ValidationError> {
        let mut step_names = HashSet::new();
        let declared_outputs: HashSet<_> = stage.outputs.iter().map(String::as_str).collect();

        for (index, step) in stage.steps.iter().chain(stage.teardown.iter()).enumerate() {
            if index < stage.steps.len() && !step_names.insert(&step.name) {
                return Err(ValidationError::DuplicateStep {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                });
            }

            // Exactly one step kind
            let kinds =
                [step.run.is_some(), step.http.is_some(), step.uses.is_some()]
                    .iter()
                    .filter(|k| **k)
                    .count();
            if kinds != 1 {
                return Err(ValidationError::AmbiguousStepKind {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                });
            }

            if let Some(uses) = &step.uses {
                if !self.collaborators.contains_key(uses) {
                    return Err(ValidationError::UnknownCollaborator {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                        name: uses.clone(),
                    });
                }
            }

            for key in &step.outputs {
                if !declared_outputs.contains(key.as_str()) {
                    return Err(ValidationError::StepOutputNotDeclared {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                        key: key.clone(),
                    });
                }
            }

            if let Some(condition) = &step.condition {
                if !Self::condition_is_valid(condition, &step_names) {
                    return Err(ValidationError::InvalidCondition {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                        condition: condition.clone(),
                    });
                }
            }
        }

        // Every ${stage.X.outputs.K} reference must point at a declared output
        // of a transitive dependency. This is the static check that makes
        // cross-stage reads race-free by construction.
        let reachable = closure.get(&stage.name).cloned().unwrap_or_default();
        for text in stage.interpolatable_strings() {
            for (referenced, key) in stage_output_refs(text) {
                let declared = self
                    .stages
                    .iter()
                    .find(|s| s.name == referenced)
                    .map(|s| s.outputs.iter().any(|o| *o == key))
                    .unwrap_or(false);
                if !reachable.contains(&referenced) || !declared {
                    return Err(ValidationError::UnknownOutputReference {
                        stage: stage.name.clone(),
                        referenced,
                        key,
                    });
                }
            }
        }

        // Input artifacts must be produced upstream
        for input in &stage.inputs {
            let produced = self.stages.iter().any(|s| {
                reachable.contains(&s.name) && s.artifacts.iter().any(|a| a.name == input.name)
            });
            if !produced {
                return Err(ValidationError::UnknownInputArtifact {
                    stage: stage.name.clone(),
                    name: input.name.clone(),
                });
            }
        }

        Ok(())
    }

    fn condition_is_valid(condition: &str, prior_steps: &HashSet<&String>) -> bool {
        match condition {
            "always" | "on-success" | "on-failure" => true,
            other => match other.strip_prefix("on-failure-of:") {
                Some(target) => prior_steps.iter().any(|s| s.as_str() == target),
                None => false,
            },
        }
    }

    /// Check for cycles in the stage graph
    fn check_cycles(&self) -> Result<(), ValidationError> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();

        for stage in &self.stages {
            if !visited.contains(&stage.name) {
                self.dfs_check(&stage.name, &mut visited, &mut stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut HashSet<String>,
    ) -> Result<(), ValidationError> {
        visited.insert(name.to_string());
        stack.insert(name.to_string());

        if let Some(stage) = self.stages.iter().find(|s| s.name == name) {
            for dep in &stage.needs {
                if stack.contains(dep) {
                    return Err(ValidationError::Cycle(dep.clone()));
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, stack)?;
                }
            }
        }

        stack.remove(name);
        Ok(())
    }

    /// Transitive `needs` closure for every stage
    pub fn transitive_needs(&self) -> HashMap<String, HashSet<String>> {
        let direct: HashMap<&str, &Vec<String>> = self
            .stages
            .iter()
            .map(|s| (s.name.as_str(), &s.needs))
            .collect();

        let mut closure = HashMap::new();
        for stage in &self.stages {
            let mut reachable = HashSet::new();
            let mut frontier: Vec<&str> = stage.needs.iter().map(String::as_str).collect();
            while let Some(dep) = frontier.pop() {
                if reachable.insert(dep.to_string()) {
                    if let Some(deps) = direct.get(dep) {
                        frontier.extend(deps.iter().map(String::as_str));
                    }
                }
            }
            closure.insert(stage.name.clone(), reachable);
        }
        closure
    }

    /// Check that every declared secret has been provided.
    ///
    /// Runs separately from structural validation because secrets arrive from
    /// the CLI, not the definition file.
    pub fn check_secrets(
        &self,
        provided: &HashMap<String, String>,
    ) -> Result<(), ValidationError> {
        for stage in &self.stages {
            for name in &stage.secrets {
                if !provided.contains_key(name) {
                    return Err(ValidationError::MissingSecret {
                        stage: stage.name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Convert the definition to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}

impl StageConfig {
    /// All strings in this stage that are subject to `${...}` interpolation
    fn interpolatable_strings(&self) -> impl Iterator<Item = &str> {
        let env_values = self.env.values().map(String::as_str);
        let step_strings = self
            .steps
            .iter()
            .chain(self.teardown.iter())
            .flat_map(|step| {
                let run = step.run.as_deref();
                let url = step.http.as_ref().map(|h| h.url.as_str());
                let body = step.http.as_ref().and_then(|h| h.body.as_deref());
                let with = step.with.values().map(String::as_str);
                run.into_iter()
                    .chain(url)
                    .chain(body)
                    .chain(with)
            });
        let artifact_paths = self
            .inputs
            .iter()
            .chain(self.artifacts.iter())
            .map(|a| a.path.as_str());
        env_values.chain(step_strings).chain(artifact_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_pipeline() {
        let yaml = r#"
name: "build-and-deploy"
version: "1.0"

env:
  APP_NAME: "demo"

stages:
  - name: "compile"
    outputs: [artifact_name]
    steps:
      - name: "package"
        run: "make package"
        outputs: [artifact_name]

  - name: "deploy"
    needs: ["compile"]
    steps:
      - name: "rollout"
        run: "deploy ${stage.compile.outputs.artifact_name}"
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "build-and-deploy");
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[1].needs, vec!["compile"]);
    }

    #[test]
    fn test_duplicate_stage_name_fails() {
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    steps: [{ name: "a", run: "true" }]
  - name: "build"
    steps: [{ name: "b", run: "true" }]
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::DuplicateStage(_))
        ));
    }

    #[test]
    fn test_unknown_need_fails() {
        let yaml = r#"
name: "test"
stages:
  - name: "deploy"
    needs: ["nonexistent"]
    steps: [{ name: "a", run: "true" }]
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::UnknownNeed { .. })
        ));
    }

    #[test]
    fn test_cycle_fails() {
        let yaml = r#"
name: "test"
stages:
  - name: "a"
    needs: ["b"]
    steps: [{ name: "s", run: "true" }]
  - name: "b"
    needs: ["a"]
    steps: [{ name: "s", run: "true" }]
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn test_output_reference_to_undeclared_key_fails() {
        // `deploy` needs `build`, but `build` never declares `image_ref`.
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    outputs: [artifact_name]
    steps:
      - name: "package"
        run: "make"
        outputs: [artifact_name]
  - name: "deploy"
    needs: ["build"]
    steps:
      - name: "rollout"
        run: "deploy ${stage.build.outputs.image_ref}"
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::UnknownOutputReference { .. })
        ));
    }

    #[test]
    fn test_output_reference_to_non_dependency_fails() {
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    outputs: [artifact_name]
    steps:
      - name: "package"
        run: "make"
        outputs: [artifact_name]
  - name: "deploy"
    steps:
      - name: "rollout"
        run: "deploy ${stage.build.outputs.artifact_name}"
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::UnknownOutputReference { .. })
        ));
    }

    #[test]
    fn test_transitive_reference_is_allowed() {
        let yaml = r#"
name: "test"
stages:
  - name: "compile"
    outputs: [artifact_name]
    steps:
      - name: "package"
        run: "make"
        outputs: [artifact_name]
  - name: "build"
    needs: ["compile"]
    steps: [{ name: "image", run: "true" }]
  - name: "deploy"
    needs: ["build"]
    steps:
      - name: "rollout"
        run: "deploy ${stage.compile.outputs.artifact_name}"
"#;

        assert!(PipelineConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_step_output_must_be_declared_by_stage() {
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    steps:
      - name: "package"
        run: "make"
        outputs: [artifact_name]
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::StepOutputNotDeclared { .. })
        ));
    }

    #[test]
    fn test_step_requires_exactly_one_kind() {
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    steps:
      - name: "package"
        run: "make"
        http: { url: "http://localhost/health" }
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::AmbiguousStepKind { .. })
        ));
    }

    #[test]
    fn test_unknown_collaborator_fails() {
        let yaml = r#"
name: "test"
stages:
  - name: "build"
    steps:
      - name: "package"
        uses: "build-tool"
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::UnknownCollaborator { .. })
        ));
    }

    #[test]
    fn test_condition_parsing() {
        let yaml = r#"
name: "test"
stages:
  - name: "deploy"
    steps:
      - name: "apply"
        run: "true"
      - name: "rollback"
        run: "true"
        condition: "on-failure-of:apply"
      - name: "report"
        run: "true"
        condition: "always"
"#;

        assert!(PipelineConfig::from_yaml(yaml).is_ok());

        let bad = yaml.replace("on-failure-of:apply", "on-failure-of:missing");
        assert!(matches!(
            PipelineConfig::from_yaml(&bad),
            Err(ValidationError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn test_input_artifact_must_be_produced_upstream() {
        let yaml = r#"
name: "test"
stages:
  - name: "deploy"
    inputs:
      - { name: "app.bin", path: "in/app.bin" }
    steps: [{ name: "rollout", run: "true" }]
"#;

        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ValidationError::UnknownInputArtifact { .. })
        ));
    }

    #[test]
    fn test_missing_secret_detected() {
        let yaml = r#"
name: "test"
stages:
  - name: "push"
    secrets: [REGISTRY_TOKEN]
    steps: [{ name: "push", run: "true" }]
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.check_secrets(&HashMap::new()),
            Err(ValidationError::MissingSecret { .. })
        ));

        let mut provided = HashMap::new();
        provided.insert("REGISTRY_TOKEN".to_string(), "t0ken".to_string());
        assert!(config.check_secrets(&provided).is_ok());
    }
}
