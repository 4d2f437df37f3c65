//! Artifact store - named blob hand-off between stages
//!
//! Build outputs travel between stages through this store rather than
//! through shared mutable state. Each key is written exactly once by its
//! producing stage, and only declared (transitive) dependents of that stage
//! may read it back.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Contract violations surfaced by the store. These indicate a bad pipeline
/// definition, not a transient runtime condition.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{key}' already exists (produced by stage '{producing}')")]
    DuplicateArtifact { key: String, producing: String },

    #[error(
        "stage '{requesting}' may not read artifact '{key}': \
         not a declared dependent of producing stage '{producing}'"
    )]
    AccessDenied {
        key: String,
        requesting: String,
        producing: String,
    },

    #[error("artifact '{0}' not found")]
    NotFound(String),
}

/// Opaque handle to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub key: String,
}

impl ArtifactRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Pluggable artifact storage. The in-memory implementation serves a
/// single-host run; a networked blob store behind the same trait serves
/// distributed runners.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a blob under `key`. Single writer per key: a second `put`
    /// for the same key fails with `DuplicateArtifact`.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        producing_stage: &str,
    ) -> Result<ArtifactRef, ArtifactError>;

    /// Fetch a blob. Fails with `AccessDenied` unless `requesting_stage`
    /// transitively needs the producing stage.
    async fn get(
        &self,
        reference: &ArtifactRef,
        requesting_stage: &str,
    ) -> Result<Arc<Vec<u8>>, ArtifactError>;

    /// Check whether a key has been written
    async fn exists(&self, key: &str) -> bool;
}

#[derive(Debug)]
struct ArtifactEntry {
    data: Arc<Vec<u8>>,
    producing_stage: String,
}

/// In-memory artifact store for single-host runs
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<String, ArtifactEntry>>,

    /// Stage name -> transitive `needs` closure, fixed at run start
    dependencies: HashMap<String, HashSet<String>>,
}

impl MemoryArtifactStore {
    /// Create a store that enforces access against the given transitive
    /// dependency closure (stage -> set of stages it may read from).
    pub fn new(dependencies: HashMap<String, HashSet<String>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            dependencies,
        }
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        producing_stage: &str,
    ) -> Result<ArtifactRef, ArtifactError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            return Err(ArtifactError::DuplicateArtifact {
                key: key.to_string(),
                producing: existing.producing_stage.clone(),
            });
        }
        entries.insert(
            key.to_string(),
            ArtifactEntry {
                data: Arc::new(data),
                producing_stage: producing_stage.to_string(),
            },
        );
        Ok(ArtifactRef::new(key))
    }

    async fn get(
        &self,
        reference: &ArtifactRef,
        requesting_stage: &str,
    ) -> Result<Arc<Vec<u8>>, ArtifactError> {
        let entries = self.entries.lock().await;
        let entry = entries
            .get(&reference.key)
            .ok_or_else(|| ArtifactError::NotFound(reference.key.clone()))?;

        let allowed = self
            .dependencies
            .get(requesting_stage)
            .map(|needs| needs.contains(&entry.producing_stage))
            .unwrap_or(false);
        if !allowed {
            return Err(ArtifactError::AccessDenied {
                key: reference.key.clone(),
                requesting: requesting_stage.to_string(),
                producing: entry.producing_stage.clone(),
            });
        }

        Ok(Arc::clone(&entry.data))
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }
}
