//! External collaborator bindings
//!
//! The build tool, image builder, registry client, and cluster client are
//! consumed, never reimplemented: each is a named command template declared
//! in the definition, invoked by `uses:` steps as an opaque subprocess.

use crate::core::config::CollaboratorConfig;
use crate::core::StageContext;
use crate::execution::runner::{run_command, Outcome, RunnerError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// An external tool a step can invoke through `uses:`
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Invoke the tool with the step's `with:` parameters against the
    /// stage's context snapshot.
    async fn invoke(
        &self,
        with: &BTreeMap<String, String>,
        ctx: &StageContext,
        time_limit: Duration,
    ) -> Result<Outcome, RunnerError>;
}

/// A collaborator backed by a configured command template.
///
/// `with:` parameters are appended as trailing `key=value` arguments in key
/// order, after interpolation.
pub struct CommandCollaborator {
    command: String,
    args: Vec<String>,
}

impl CommandCollaborator {
    pub fn new(config: &CollaboratorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

#[async_trait]
impl Collaborator for CommandCollaborator {
    async fn invoke(
        &self,
        with: &BTreeMap<String, String>,
        ctx: &StageContext,
        time_limit: Duration,
    ) -> Result<Outcome, RunnerError> {
        let mut args: Vec<String> = self.args.iter().map(|a| ctx.interpolate(a)).collect();
        for (key, value) in with {
            args.push(format!("{}={}", key, ctx.interpolate(value)));
        }

        run_command(&self.command, &args, &ctx.env, time_limit).await
    }
}

/// Resolves `uses:` names to collaborator implementations
#[derive(Default)]
pub struct CollaboratorRegistry {
    bindings: HashMap<String, Arc<dyn Collaborator>>,
}

impl CollaboratorRegistry {
    /// Build a registry from the definition's `collaborators:` section
    pub fn from_config(configs: &HashMap<String, CollaboratorConfig>) -> Self {
        let bindings = configs
            .iter()
            .map(|(name, config)| {
                let collaborator: Arc<dyn Collaborator> =
                    Arc::new(CommandCollaborator::new(config));
                (name.clone(), collaborator)
            })
            .collect();
        Self { bindings }
    }

    /// Register a custom collaborator implementation
    pub fn register(&mut self, name: impl Into<String>, collaborator: Arc<dyn Collaborator>) {
        self.bindings.insert(name.into(), collaborator);
    }

    /// Resolve a collaborator by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Collaborator>> {
        self.bindings.get(name).cloned()
    }
}
