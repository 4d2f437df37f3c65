//! conveyor - a declarative build, publish and deploy orchestrator

pub mod artifact;
pub mod cli;
pub mod collab;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use artifact::{ArtifactError, ArtifactRef, ArtifactStore, MemoryArtifactStore};
pub use collab::{Collaborator, CollaboratorRegistry};
pub use core::{ExecutionStatus, Pipeline, PipelineConfig, RunContext, Stage, StageState, Step, ValidationError};
pub use execution::{ExecutionEngine, ExecutionEvent, RunOptions, SchedulingStrategy, StepRunner};
