//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, steps, and their configuration.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod step;

pub use config::{PipelineConfig, ValidationError};
pub use context::{RunContext, StageContext};
pub use pipeline::Pipeline;
pub use stage::Stage;
pub use state::{ExecutionStatus, RunState, StageState};
pub use step::{Step, StepCondition, StepKind};
