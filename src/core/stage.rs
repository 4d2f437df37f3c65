//! Stage domain model

use crate::core::config::{ArtifactBinding, StageConfig};
use crate::core::state::StageState;
use crate::core::step::Step;
use std::collections::{HashMap, HashSet};

/// A named, ordered group of steps with declared inputs and outputs
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// Stages that must succeed before this one runs
    pub needs: Vec<String>,

    /// Stage-level environment; wins over pipeline-level on conflict
    pub env: HashMap<String, String>,

    /// Secret names scoped to this stage
    pub secrets: Vec<String>,

    /// Output keys this stage publishes on success
    pub declared_outputs: Vec<String>,

    /// Artifacts consumed from the store before steps run
    pub inputs: Vec<ArtifactBinding>,

    /// Artifacts published to the store after success
    pub artifacts: Vec<ArtifactBinding>,

    /// Ordered steps, strictly sequential
    pub steps: Vec<Step>,

    /// Cleanup steps queued when the stage starts
    pub teardown: Vec<Step>,

    /// Runtime state
    pub state: StageState,
}

impl Stage {
    /// Create a stage from its config entry
    pub fn from_config(config: &StageConfig, default_timeout_secs: u64) -> Self {
        let steps = config
            .steps
            .iter()
            .map(|s| Step::from_config(s, default_timeout_secs))
            .collect();
        let teardown = config
            .teardown
            .iter()
            .map(|s| Step::from_config(s, default_timeout_secs))
            .collect();

        Stage {
            name: config.name.clone(),
            needs: config.needs.clone(),
            env: config.env.clone(),
            secrets: config.secrets.clone(),
            declared_outputs: config.outputs.clone(),
            inputs: config.inputs.clone(),
            artifacts: config.artifacts.clone(),
            steps,
            teardown,
            state: StageState::Pending,
        }
    }

    /// Check if every dependency has succeeded
    pub fn needs_met(&self, succeeded: &HashSet<String>) -> bool {
        self.needs.iter().all(|dep| succeeded.contains(dep))
    }

    /// Check if any dependency ended in a state that blocks this stage
    pub fn blocked_by(&self, failed_or_skipped: &HashSet<String>) -> Option<&str> {
        self.needs
            .iter()
            .find(|dep| failed_or_skipped.contains(*dep))
            .map(String::as_str)
    }
}
