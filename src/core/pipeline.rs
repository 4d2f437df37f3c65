//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    stage::Stage,
    state::{ExecutionStatus, RunState, StageState},
};
use std::collections::{HashMap, HashSet};

/// A validated pipeline: a DAG of stages plus its run record
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Pipeline-level environment
    pub env: HashMap<String, String>,

    /// Stages by name
    pub stages: HashMap<String, Stage>,

    /// Execution record
    pub state: RunState,

    /// Stage execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from a validated definition
    pub fn from_config(config: &PipelineConfig) -> Self {
        let stages: HashMap<String, Stage> = config
            .stages
            .iter()
            .map(|stage_config| {
                let stage = Stage::from_config(stage_config, config.defaults.step_timeout_secs);
                (stage.name.clone(), stage)
            })
            .collect();

        let execution_order = Self::topological_sort(&stages);

        Pipeline {
            name: config.name.clone(),
            env: config.env.clone(),
            stages,
            state: RunState::new(),
            execution_order,
        }
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    /// Get a mutable stage by name
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.get_mut(name)
    }

    /// Get stage execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Names of stages ready to run: pending, with every need succeeded
    pub fn ready_stages(&self) -> Vec<String> {
        let succeeded: HashSet<String> = self
            .stages
            .values()
            .filter(|s| matches!(s.state, StageState::Succeeded { .. }))
            .map(|s| s.name.clone())
            .collect();

        self.execution_order
            .iter()
            .filter(|name| {
                self.stages
                    .get(*name)
                    .map(|s| matches!(s.state, StageState::Pending) && s.needs_met(&succeeded))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Mark pending stages whose dependency failed or was skipped as skipped.
    /// Repeats until the skip set stops growing, so skips propagate
    /// transitively through the graph. Returns the newly skipped stages with
    /// their reasons.
    pub fn propagate_skips(&mut self) -> Vec<(String, String)> {
        let mut newly_skipped = Vec::new();
        loop {
            let blocked: HashSet<String> = self
                .stages
                .values()
                .filter(|s| {
                    matches!(
                        s.state,
                        StageState::Failed { .. } | StageState::Skipped { .. }
                    )
                })
                .map(|s| s.name.clone())
                .collect();

            let to_skip: Vec<(String, String)> = self
                .stages
                .values()
                .filter(|s| matches!(s.state, StageState::Pending))
                .filter_map(|s| {
                    s.blocked_by(&blocked)
                        .map(|dep| (s.name.clone(), dep.to_string()))
                })
                .collect();

            if to_skip.is_empty() {
                return newly_skipped;
            }

            for (name, dep) in to_skip {
                let reason = format!("dependency '{}' did not succeed", dep);
                if let Some(stage) = self.stages.get_mut(&name) {
                    stage.state = StageState::Skipped {
                        reason: reason.clone(),
                    };
                }
                newly_skipped.push((name, reason));
            }
        }
    }

    /// Check if every stage is in a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.values().all(|s| s.state.is_terminal())
    }

    /// Overall terminal status: succeeded only if every stage succeeded
    pub fn overall_status(&self) -> ExecutionStatus {
        if self
            .stages
            .values()
            .all(|s| matches!(s.state, StageState::Succeeded { .. }))
        {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        }
    }

    /// Transitive `needs` closure per stage; the artifact store uses this
    /// to enforce that consumers are declared dependents of producers.
    pub fn transitive_needs(&self) -> HashMap<String, HashSet<String>> {
        let mut closure = HashMap::new();
        for stage in self.stages.values() {
            let mut reachable = HashSet::new();
            let mut frontier: Vec<&str> = stage.needs.iter().map(String::as_str).collect();
            while let Some(dep) = frontier.pop() {
                if reachable.insert(dep.to_string()) {
                    if let Some(s) = self.stages.get(dep) {
                        frontier.extend(s.needs.iter().map(String::as_str));
                    }
                }
            }
            closure.insert(stage.name.clone(), reachable);
        }
        closure
    }

    /// Recompute run-record counts from the current stage states
    pub fn update_counts(&mut self) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for stage in self.stages.values() {
            match &stage.state {
                StageState::Succeeded { .. } => succeeded += 1,
                StageState::Failed { .. } => failed += 1,
                StageState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }

        let total = self.stages.len();
        self.state.update_counts(total, succeeded, failed, skipped);
    }

    /// Calculate topological sort of stages based on `needs`
    fn topological_sort(stages: &HashMap<String, Stage>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        // Sort for deterministic order
        let mut names: Vec<_> = stages.keys().cloned().collect();
        names.sort();

        for name in names {
            Self::visit(&name, stages, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        name: &str,
        stages: &HashMap<String, Stage>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(name) {
            return;
        }
        visited.insert(name.to_string());

        if let Some(stage) = stages.get(name) {
            for dep in &stage.needs {
                Self::visit(dep, stages, visited, result);
            }
        }

        result.push(name.to_string());
    }
}
