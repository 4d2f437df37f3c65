//! Run context - merged environment and cross-stage output propagation
//!
//! Stages never share mutable environment. Each stage gets an immutable
//! [`StageContext`] snapshot assembled when the stage becomes ready, and
//! outputs flow forward only through the explicit propagation step at stage
//! completion.

use crate::core::stage::Stage;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn stage_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{stage\.([A-Za-z0-9_-]+)\.outputs\.([A-Za-z0-9_-]+)\}")
            .expect("stage reference pattern is valid")
    })
}

fn env_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{env\.([A-Za-z0-9_]+)\}").expect("env reference pattern is valid")
    })
}

/// Extract every `${stage.<name>.outputs.<key>}` reference in a string
pub fn stage_output_refs(text: &str) -> Vec<(String, String)> {
    stage_ref_regex()
        .captures_iter(text)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Mutable execution record shared by the engine across a run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Pipeline-level env merged with CLI `--var` overrides (overrides win)
    pub vars: HashMap<String, String>,

    /// Outputs of succeeded stages (stage name -> key -> value)
    stage_outputs: HashMap<String, HashMap<String, String>>,

    /// Provided secrets; injected only into stages that declare them
    secrets: HashMap<String, String>,
}

impl RunContext {
    pub fn new(vars: HashMap<String, String>, secrets: HashMap<String, String>) -> Self {
        Self {
            vars,
            stage_outputs: HashMap::new(),
            secrets,
        }
    }

    /// Record the outputs of a succeeded stage. Called exactly once per stage.
    pub fn publish_outputs(&mut self, stage: &str, outputs: HashMap<String, String>) {
        self.stage_outputs.insert(stage.to_string(), outputs);
    }

    /// Look up a single published output
    pub fn stage_output(&self, stage: &str, key: &str) -> Option<&String> {
        self.stage_outputs.get(stage).and_then(|o| o.get(key))
    }

    /// Build the immutable context snapshot for a stage about to run.
    ///
    /// Precedence: stage env > secrets > pipeline vars. Values are
    /// interpolated here, so a stage env entry may reference upstream
    /// outputs already at snapshot time.
    pub fn snapshot_for_stage(&self, stage: &Stage) -> StageContext {
        let mut env = self.vars.clone();
        let mut secret_values = Vec::new();

        for name in &stage.secrets {
            if let Some(value) = self.secrets.get(name) {
                env.insert(name.clone(), value.clone());
                secret_values.push(value.clone());
            }
        }

        for (key, value) in &stage.env {
            env.insert(key.clone(), value.clone());
        }

        let env = env
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate_with(v, &env)))
            .collect();

        StageContext {
            stage_name: stage.name.clone(),
            env,
            stage_outputs: self.stage_outputs.clone(),
            secret_values,
        }
    }

    fn interpolate_with(&self, text: &str, env: &HashMap<String, String>) -> String {
        let replaced = stage_ref_regex().replace_all(text, |caps: &regex::Captures<'_>| {
            self.stage_output(&caps[1], &caps[2])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        env_ref_regex()
            .replace_all(&replaced, |caps: &regex::Captures<'_>| {
                env.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Immutable per-stage snapshot handed to the step runner
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Name of the stage this snapshot was built for
    pub stage_name: String,

    /// Fully merged environment for the stage's steps
    pub env: HashMap<String, String>,

    /// Outputs of stages that had already succeeded at snapshot time
    stage_outputs: HashMap<String, HashMap<String, String>>,

    /// Secret values to mask in anything logged or echoed
    secret_values: Vec<String>,
}

impl StageContext {
    /// Build an empty snapshot, mostly for tests and teardown defaults
    pub fn empty(stage_name: &str) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            env: HashMap::new(),
            stage_outputs: HashMap::new(),
            secret_values: Vec::new(),
        }
    }

    /// Resolve `${stage.X.outputs.K}` and `${env.K}` references in a string.
    /// Unresolvable references are left verbatim; validation makes that
    /// possible only for stages outside the dependency closure.
    pub fn interpolate(&self, text: &str) -> String {
        let replaced = stage_ref_regex().replace_all(text, |caps: &regex::Captures<'_>| {
            self.stage_outputs
                .get(&caps[1])
                .and_then(|o| o.get(&caps[2]))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        env_ref_regex()
            .replace_all(&replaced, |caps: &regex::Captures<'_>| {
                self.env
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Replace every secret value with `***`. Applied to all captured
    /// stdout/stderr before it reaches logs or events.
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.secret_values {
            if !value.is_empty() {
                masked = masked.replace(value, "***");
            }
        }
        masked
    }
}
