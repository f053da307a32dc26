//! Shared dev server state.
//!
//! # Responsibilities
//! - Own the asset store, build registry and dispatcher
//! - Keep the current project snapshot, re-reading the project file before
//!   each routed request
//! - Resolve a destination to a built asset, building on demand
//!
//! # Design Decisions
//! - Unchanged project content reuses the compiled snapshot
//! - A broken edit at runtime is logged and the previous snapshot kept;
//!   only startup treats configuration errors as fatal
//! - Reloads are serialized so one edit reconciles builds once
//! - The project file listing is cached only while a watcher is running to
//!   invalidate it

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::Mutex;

use crate::assets::store::{AssetStore, ResolvedAsset};
use crate::builds::builder::{BuilderCatalog, BuilderVersion};
use crate::builds::dispatcher::{BuildDispatcher, BuildError};
use crate::builds::registry::{scan_project_files, BuildMatchRegistry};
use crate::config::loader::{read_project_source, ProjectSnapshot};
use crate::config::schema::DevConfig;
use crate::error::DevError;
use crate::http::proxy;
use crate::http::request::generate_pod_id;
use crate::lifecycle::Shutdown;

/// State shared by every request.
pub struct DevState {
    pub config: DevConfig,
    /// Prefix of every trace id issued by this process.
    pub pod_id: String,
    project: ArcSwap<ProjectSnapshot>,
    reload_lock: Mutex<()>,
    files: ArcSwapOption<Vec<String>>,
    files_cached: AtomicBool,
    files_generation: AtomicU64,
    pub assets: Arc<AssetStore>,
    pub registry: BuildMatchRegistry,
    pub dispatcher: Arc<BuildDispatcher>,
    pub client: reqwest::Client,
    pub shutdown: Shutdown,
}

impl DevState {
    /// Load the project, register its builds and run eager builds.
    pub async fn initialize(config: DevConfig, catalog: BuilderCatalog) -> Result<Arc<Self>, DevError> {
        let paths = &config.project;
        let snapshot = ProjectSnapshot::load(paths).await?;
        tracing::info!(
            root = %paths.root.display(),
            config_file = snapshot.source.is_some(),
            routes = snapshot.routes.len(),
            builds = snapshot.config.builds.len(),
            "Project loaded"
        );

        let assets = Arc::new(AssetStore::new());
        let registry = BuildMatchRegistry::new(catalog, assets.clone());
        registry.reconcile(&snapshot.config.builds).await;

        let dispatcher = Arc::new(BuildDispatcher::new(
            paths.root.clone(),
            config.builds.rebuild_window(),
            assets.clone(),
            snapshot.env.clone(),
        ));

        let state = Arc::new(Self {
            pod_id: generate_pod_id(),
            project: ArcSwap::from_pointee(snapshot),
            reload_lock: Mutex::new(()),
            files: ArcSwapOption::empty(),
            files_cached: AtomicBool::new(false),
            files_generation: AtomicU64::new(0),
            assets,
            registry,
            dispatcher,
            client: proxy::build_client()?,
            shutdown: Shutdown::new(),
            config,
        });
        state.build_eager().await;
        Ok(state)
    }

    async fn build_eager(&self) {
        let entries = self.registry.entries();
        if !entries.iter().any(|m| m.builder_version == BuilderVersion::V1) {
            return;
        }
        let files = match self.project_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "Failed to scan project for eager builds");
                return;
            }
        };
        for error in self.dispatcher.build_eager(&entries, &files).await {
            tracing::error!(entrypoint = %error.entrypoint, error = %error.message, "Eager build failed");
        }
    }

    /// The current project, reloaded if its file changed.
    pub async fn current_project(&self) -> Arc<ProjectSnapshot> {
        let paths = &self.config.project;
        let source = match read_project_source(&paths.config_path()).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read project config, keeping previous");
                return self.project.load_full();
            }
        };

        let current = self.project.load_full();
        if current.source == source {
            return current;
        }

        let _guard = self.reload_lock.lock().await;
        let current = self.project.load_full();
        if current.source == source {
            return current;
        }

        let next = match ProjectSnapshot::from_source(source, paths) {
            Ok(next) => Arc::new(next),
            Err(e) => {
                tracing::error!(error = %e, "Invalid project config, keeping previous");
                return current;
            }
        };

        if next.env != current.env {
            self.dispatcher.set_env(next.env.clone());
        }
        self.project.store(next.clone());
        if next.config.builds != current.config.builds {
            self.registry.reconcile(&next.config.builds).await;
            let forgotten = self.dispatcher.forget_retired();
            tracing::debug!(forgotten, "Dropped builds of removed sources");
        }
        tracing::info!(routes = next.routes.len(), builds = next.config.builds.len(), "Project config reloaded");
        next
    }

    /// Relative paths of every project file.
    pub async fn project_files(&self) -> std::io::Result<Arc<Vec<String>>> {
        if let Some(files) = self.files.load_full() {
            return Ok(files);
        }

        let generation = self.files_generation.load(Ordering::SeqCst);
        let files = Arc::new(scan_project_files(&self.config.project.root).await?);
        if self.files_cached.load(Ordering::SeqCst) {
            self.files.store(Some(files.clone()));
            // A change seen during the scan makes this listing stale.
            if self.files_generation.load(Ordering::SeqCst) != generation {
                self.files.store(None);
            }
        }
        Ok(files)
    }

    /// Start caching the file listing. Only call once something will
    /// invalidate it on change.
    pub fn enable_file_cache(&self) {
        self.files_cached.store(true, Ordering::SeqCst);
    }

    /// Forget the cached file listing.
    pub fn invalidate_project_files(&self) {
        self.files_generation.fetch_add(1, Ordering::SeqCst);
        self.files.store(None);
    }

    /// Resolve `destination` to a stored asset, building when needed.
    ///
    /// `existing` is what the store currently holds for the destination; it
    /// is rebuilt only when `force` is set and it came from a build.
    pub async fn resolve_asset(
        &self,
        destination: &str,
        existing: Option<ResolvedAsset>,
        force: bool,
    ) -> Result<Option<ResolvedAsset>, BuildError> {
        let target = match &existing {
            Some(_) if !force => return Ok(existing.clone()),
            Some(asset) => match &asset.entry.origin {
                Some(origin) => self
                    .registry
                    .lookup(&origin.entrypoint)
                    .map(|m| (origin.entrypoint.clone(), m)),
                None => return Ok(existing.clone()),
            },
            None => {
                let files = self.project_files().await.map_err(|e| BuildError {
                    entrypoint: destination.to_string(),
                    message: format!("failed to scan project: {e}"),
                })?;
                self.registry.resolve_entrypoint(destination, &files)
            }
        };

        let Some((entrypoint, build_match)) = target else {
            return Ok(existing);
        };
        let completed = self.dispatcher.ensure_built(&entrypoint, &build_match, force).await?;

        Ok(self.assets.get(destination).or_else(|| {
            completed
                .output_for(destination)
                .and_then(|key| self.assets.get(key))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state_for(root: &std::path::Path) -> Arc<DevState> {
        let mut config = DevConfig::default();
        config.project.root = root.to_path_buf();
        config.watch.enabled = false;
        DevState::initialize(config, BuilderCatalog::with_defaults()).await.unwrap()
    }

    #[tokio::test]
    async fn file_listing_is_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), "a").unwrap();
        let state = state_for(dir.path()).await;
        state.enable_file_cache();

        assert_eq!(*state.project_files().await.unwrap(), vec!["a.html"]);
        std::fs::write(dir.path().join("b.html"), "b").unwrap();
        assert_eq!(*state.project_files().await.unwrap(), vec!["a.html"]);

        state.invalidate_project_files();
        assert_eq!(*state.project_files().await.unwrap(), vec!["a.html", "b.html"]);
    }

    #[tokio::test]
    async fn file_listing_is_rescanned_without_a_watcher() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), "a").unwrap();
        let state = state_for(dir.path()).await;

        assert_eq!(state.project_files().await.unwrap().len(), 1);
        std::fs::write(dir.path().join("b.html"), "b").unwrap();
        assert_eq!(state.project_files().await.unwrap().len(), 2);
    }
}
