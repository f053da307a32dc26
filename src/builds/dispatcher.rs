//! Build dispatch.
//!
//! # Responsibilities
//! - Run a build match's builder for one entrypoint
//! - Join concurrent requests for the same entrypoint onto one build
//! - Serve recent builds from cache within the rebuild window
//! - Publish outputs to the asset store and tear down what they replace
//!
//! # Design Decisions
//! - Builds run in their own task, so a disconnecting client doesn't
//!   cancel a build other requests are waiting on
//! - A failed build leaves previously published outputs in place
//! - No retries and no timeout: a hung build hangs its waiters

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::time::Instant;

use crate::assets::artifact::BuildArtifact;
use crate::assets::store::{self, AssetEntry, AssetOrigin, AssetStore};
use crate::builds::builder::{BuildContext, BuildOutput, BuilderVersion};
use crate::builds::registry::BuildMatch;
use crate::config::env::ProjectEnv;
use crate::observability::metrics;

/// Identity of a build: which entrypoint, through which builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub entrypoint: String,
    pub builder: String,
}

impl BuildKey {
    pub fn new(entrypoint: impl Into<String>, builder: impl Into<String>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            builder: builder.into(),
        }
    }
}

/// A successful build.
#[derive(Debug)]
pub struct CompletedBuild {
    pub build_match: Arc<BuildMatch>,
    pub entrypoint: String,
    pub outputs: BTreeMap<String, BuildArtifact>,
    pub built_at: Instant,
}

impl CompletedBuild {
    /// Output key that best answers `destination`: an exact output, then
    /// the entrypoint's own output, then a lone output.
    pub fn output_for(&self, destination: &str) -> Option<&str> {
        let wanted = destination.trim_start_matches('/');
        if let Some((key, _)) = self.outputs.get_key_value(wanted) {
            return Some(key);
        }
        if let Some((key, _)) = self.outputs.get_key_value(self.entrypoint.as_str()) {
            return Some(key);
        }
        if self.outputs.len() == 1 {
            return self.outputs.keys().next().map(String::as_str);
        }
        None
    }
}

/// A build failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("build failed for {entrypoint}: {message}")]
pub struct BuildError {
    pub entrypoint: String,
    pub message: String,
}

type BuildResult = Result<Arc<CompletedBuild>, BuildError>;
type SharedBuild = Shared<BoxFuture<'static, BuildResult>>;

/// Runs builds and tracks what they produced.
pub struct BuildDispatcher {
    work_path: PathBuf,
    rebuild_window: Duration,
    assets: Arc<AssetStore>,
    env: ArcSwap<ProjectEnv>,
    in_flight: DashMap<BuildKey, (u64, SharedBuild)>,
    completed: DashMap<BuildKey, Arc<CompletedBuild>>,
    generation: AtomicU64,
}

impl BuildDispatcher {
    pub fn new(work_path: PathBuf, rebuild_window: Duration, assets: Arc<AssetStore>, env: ProjectEnv) -> Self {
        Self {
            work_path,
            rebuild_window,
            assets,
            env: ArcSwap::from_pointee(env),
            in_flight: DashMap::new(),
            completed: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the environment handed to subsequent builds.
    pub fn set_env(&self, env: ProjectEnv) {
        self.env.store(Arc::new(env));
    }

    /// Number of builds currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Latest successful build for `entrypoint` through `builder`.
    pub fn completed(&self, entrypoint: &str, builder: &str) -> Option<Arc<CompletedBuild>> {
        self.completed
            .get(&BuildKey::new(entrypoint, builder))
            .map(|c| c.value().clone())
    }

    /// Make sure `entrypoint` has been built by `build_match`.
    ///
    /// Joins a running build for the same key. Otherwise reuses the last
    /// build when it came from the same match and either no rebuild was
    /// asked for or it is younger than the rebuild window.
    pub async fn ensure_built(self: &Arc<Self>, entrypoint: &str, build_match: &Arc<BuildMatch>, force: bool) -> BuildResult {
        let key = BuildKey::new(entrypoint, &build_match.builder_id);

        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) => {
                tracing::debug!(entrypoint, builder = %key.builder, "Joining in-flight build");
                metrics::record_build_dedup(&key.builder);
                running.get().1.clone()
            }
            Entry::Vacant(slot) => {
                if let Some(cached) = self.reusable(&key, build_match, force) {
                    return Ok(cached);
                }

                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(self.clone().run_build(key.clone(), generation, build_match.clone()));
                let failed_entrypoint = key.entrypoint.clone();
                let shared = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(BuildError {
                            entrypoint: failed_entrypoint,
                            message: format!("build task failed: {e}"),
                        })
                    })
                }
                .boxed()
                .shared();
                slot.insert((generation, shared.clone()));
                shared
            }
        };

        shared.await
    }

    fn reusable(&self, key: &BuildKey, build_match: &Arc<BuildMatch>, force: bool) -> Option<Arc<CompletedBuild>> {
        let cached = self.completed.get(key)?.value().clone();
        if !Arc::ptr_eq(&cached.build_match, build_match) {
            return None;
        }
        if !cached.outputs.keys().all(|path| self.assets.contains(path)) {
            return None;
        }
        let fresh = cached.built_at.elapsed() < self.rebuild_window;
        if force && !fresh {
            return None;
        }
        if force {
            tracing::debug!(entrypoint = %key.entrypoint, "Rebuild skipped, previous build is recent");
        }
        Some(cached)
    }

    async fn run_build(self: Arc<Self>, key: BuildKey, generation: u64, build_match: Arc<BuildMatch>) -> BuildResult {
        let started = std::time::Instant::now();
        tracing::info!(entrypoint = %key.entrypoint, builder = %key.builder, "Building");

        let result = match self.execute(&key.entrypoint, &build_match).await {
            Ok(output) => {
                tracing::info!(
                    entrypoint = %key.entrypoint,
                    outputs = output.outputs.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Build complete"
                );
                Ok(self.publish(&key, build_match, output).await)
            }
            Err(e) => {
                tracing::error!(entrypoint = %key.entrypoint, builder = %key.builder, error = %e.message, "Build failed");
                Err(e)
            }
        };
        metrics::record_build(&key.builder, result.is_ok(), started);

        self.in_flight.remove_if(&key, |_, (current, _)| *current == generation);
        result
    }

    async fn execute(&self, entrypoint: &str, build_match: &BuildMatch) -> Result<BuildOutput, BuildError> {
        let fail = |message: String| BuildError {
            entrypoint: entrypoint.to_string(),
            message,
        };
        let builder = build_match
            .builder
            .clone()
            .ok_or_else(|| fail(format!("unknown builder `{}`", build_match.builder_id)))?;

        let env = self.env.load_full();
        let ctx = BuildContext {
            entrypoint: entrypoint.to_string(),
            work_path: self.work_path.clone(),
            config: build_match.config.clone(),
            env: env.build.clone(),
            runtime_env: env.runtime.clone(),
        };
        builder.build(ctx).await.map_err(|e| fail(e.to_string()))
    }

    async fn publish(&self, key: &BuildKey, build_match: Arc<BuildMatch>, output: BuildOutput) -> Arc<CompletedBuild> {
        if build_match.is_retired() {
            tracing::info!(entrypoint = %key.entrypoint, src = %build_match.source_pattern, "Discarding build of a removed source");
            for artifact in output.outputs.values() {
                store::destroy_artifact(artifact).await;
            }
            return self.unrecorded(key, build_match, output);
        }

        let origin = AssetOrigin {
            source_pattern: build_match.source_pattern.clone(),
            entrypoint: key.entrypoint.clone(),
        };

        let mut published = Vec::with_capacity(output.outputs.len());
        let mut retired = Vec::new();
        for (path, artifact) in &output.outputs {
            let entry = Arc::new(AssetEntry::new(artifact.clone(), Some(origin.clone())));
            retired.extend(self.assets.insert(path, entry.clone()));
            published.push((path.clone(), entry));
        }

        // Reconcile may have retired the match while the outputs went in.
        if build_match.is_retired() {
            for (path, entry) in &published {
                retired.extend(self.assets.remove_exact(path.as_str(), entry));
            }
            store::teardown(retired).await;
            return self.unrecorded(key, build_match, output);
        }

        if let Some(previous) = self.completed(&key.entrypoint, &key.builder) {
            let dropped: HashSet<&str> = previous
                .outputs
                .keys()
                .map(String::as_str)
                .filter(|path| !output.outputs.contains_key(*path))
                .collect();
            if !dropped.is_empty() {
                retired.extend(self.assets.remove_where(|path, entry| {
                    dropped.contains(path) && entry.origin.as_ref().is_some_and(|o| o.entrypoint == key.entrypoint)
                }));
            }
        }

        let completed = Arc::new(CompletedBuild {
            build_match,
            entrypoint: key.entrypoint.clone(),
            outputs: output.outputs,
            built_at: Instant::now(),
        });
        self.completed.insert(key.clone(), completed.clone());

        store::teardown(retired).await;
        completed
    }

    fn unrecorded(&self, key: &BuildKey, build_match: Arc<BuildMatch>, output: BuildOutput) -> Arc<CompletedBuild> {
        Arc::new(CompletedBuild {
            build_match,
            entrypoint: key.entrypoint.clone(),
            outputs: output.outputs,
            built_at: Instant::now(),
        })
    }

    /// Build every matching file of every version-1 match, once.
    pub async fn build_eager(self: &Arc<Self>, matches: &[Arc<BuildMatch>], files: &[String]) -> Vec<BuildError> {
        let mut errors = Vec::new();
        for build_match in matches.iter().filter(|m| m.builder_version == BuilderVersion::V1) {
            for file in files.iter().filter(|f| build_match.matches(f)) {
                if let Err(e) = self.ensure_built(file, build_match, false).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Forget builds of `entrypoint` and drop their published outputs.
    ///
    /// Returns true when anything was invalidated.
    pub async fn invalidate_entrypoint(&self, entrypoint: &str) -> bool {
        let keys: Vec<BuildKey> = self
            .completed
            .iter()
            .filter(|c| c.key().entrypoint == entrypoint)
            .map(|c| c.key().clone())
            .collect();
        if keys.is_empty() {
            return false;
        }
        for key in &keys {
            self.completed.remove(key);
        }

        let dropped = self
            .assets
            .remove_where(|_, entry| entry.origin.as_ref().is_some_and(|o| o.entrypoint == entrypoint));
        tracing::info!(entrypoint, assets = dropped.len(), "Invalidated cached build");
        store::teardown(dropped).await;
        true
    }

    /// Drop completed builds whose match was retired by a reconcile.
    pub fn forget_retired(&self) -> usize {
        let before = self.completed.len();
        self.completed.retain(|_, build| !build.build_match.is_retired());
        before - self.completed.len()
    }

    /// Forget every completed build.
    pub fn clear(&self) {
        self.completed.clear();
    }
}
