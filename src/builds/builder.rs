//! Builder contract and catalog.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::assets::artifact::BuildArtifact;
use crate::builds::builtin::{ExecBuilder, StaticBuilder, EXEC_BUILDER, STATIC_BUILDER};
use crate::config::env::EnvMap;

/// Builder generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderVersion {
    /// Builds every matching source once, at startup.
    V1,
    /// Builds one entrypoint at a time, on demand.
    V2,
}

/// Everything a builder gets for one build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Project-relative source file.
    pub entrypoint: String,
    /// Project root.
    pub work_path: PathBuf,
    /// Per-build `config` from the project file.
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Build-time environment.
    pub env: EnvMap,
    /// Environment handed to produced functions.
    pub runtime_env: EnvMap,
}

impl BuildContext {
    pub fn entrypoint_path(&self) -> PathBuf {
        self.work_path.join(&self.entrypoint)
    }
}

/// Outputs keyed by logical path (no leading slash).
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub outputs: BTreeMap<String, BuildArtifact>,
}

impl BuildOutput {
    pub fn single(path: impl Into<String>, artifact: BuildArtifact) -> Self {
        let mut outputs = BTreeMap::new();
        outputs.insert(path.into(), artifact);
        Self { outputs }
    }
}

pub type BuilderError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a source entrypoint into artifacts.
#[async_trait]
pub trait Builder: Send + Sync {
    fn version(&self) -> BuilderVersion;

    async fn build(&self, ctx: BuildContext) -> Result<BuildOutput, BuilderError>;
}

/// Builders by identifier (the project file's `use` value).
#[derive(Clone, Default)]
pub struct BuilderCatalog {
    builders: HashMap<String, Arc<dyn Builder>>,
}

impl BuilderCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in static and exec builders.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(STATIC_BUILDER, StaticBuilder)
            .register(EXEC_BUILDER, ExecBuilder)
    }

    pub fn register<B: Builder + 'static>(mut self, id: impl Into<String>, builder: B) -> Self {
        self.builders.insert(id.into(), Arc::new(builder));
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Builder>> {
        self.builders.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for BuilderCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderCatalog").field("builders", &self.ids()).finish()
    }
}
