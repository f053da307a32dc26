//! Build match registry.
//!
//! # Responsibilities
//! - Hold one [`BuildMatch`] per declared build source, in declaration order
//! - Reconcile against a new declaration list: keep, replace, insert, remove
//! - Resolve request destinations to source entrypoints
//!
//! # Design Decisions
//! - The entry list is swapped atomically (`ArcSwap`); readers never lock
//! - Identity is the `Arc`: an unchanged (pattern, builder) keeps its entry,
//!   a changed builder gets a fresh one so cached builds no longer apply
//! - Removing or replacing an entry drops its assets and destroys functions

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::assets::store::{self, AssetStore};
use crate::builds::builder::{Builder, BuilderCatalog, BuilderVersion};
use crate::config::schema::BuildConfig;

/// Directories never considered as build sources.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", ".now"];

/// A declared build source bound to its builder.
pub struct BuildMatch {
    pub source_pattern: String,
    pub builder_id: String,
    /// Generation of the resolved builder (V2 when the builder is unknown).
    pub builder_version: BuilderVersion,
    pub config: serde_json::Map<String, serde_json::Value>,
    matcher: GlobMatcher,
    /// `None` when the identifier isn't in the catalog; building fails.
    pub builder: Option<Arc<dyn Builder>>,
    retired: AtomicBool,
}

impl BuildMatch {
    pub fn new(declared: &BuildConfig, catalog: &BuilderCatalog) -> Result<Self, globset::Error> {
        let matcher = GlobBuilder::new(&declared.src)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        let builder = catalog.get(&declared.builder);
        let builder_version = builder.as_ref().map_or(BuilderVersion::V2, |b| b.version());

        Ok(Self {
            source_pattern: declared.src.clone(),
            builder_id: declared.builder.clone(),
            builder_version,
            config: declared.config.clone(),
            matcher,
            builder,
            retired: AtomicBool::new(false),
        })
    }

    /// True when `source` (project-relative, `/`-separated) belongs to this build.
    /// `*` stays within one path segment; `**` crosses them.
    pub fn matches(&self, source: &str) -> bool {
        self.matcher.is_match(source)
    }

    /// Mark this entry as no longer declared. Builds still running for it
    /// discard their outputs instead of publishing them.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for BuildMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildMatch")
            .field("source_pattern", &self.source_pattern)
            .field("builder_id", &self.builder_id)
            .field("builder_version", &self.builder_version)
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// What a reconcile changed, by source pattern.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub replaced: Vec<String>,
}

impl ReconcileOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.replaced.is_empty()
    }
}

/// Live association between source globs and builders.
pub struct BuildMatchRegistry {
    catalog: BuilderCatalog,
    assets: Arc<AssetStore>,
    entries: ArcSwap<Vec<Arc<BuildMatch>>>,
}

impl BuildMatchRegistry {
    pub fn new(catalog: BuilderCatalog, assets: Arc<AssetStore>) -> Self {
        Self {
            catalog,
            assets,
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Current entries in declaration order.
    pub fn entries(&self) -> Arc<Vec<Arc<BuildMatch>>> {
        self.entries.load_full()
    }

    /// Bring the registry in line with `declared`.
    ///
    /// Declarations whose glob doesn't compile are skipped (validation
    /// reports them before this point).
    pub async fn reconcile(&self, declared: &[BuildConfig]) -> ReconcileOutcome {
        let current = self.entries.load_full();
        let mut outcome = ReconcileOutcome::default();
        let mut next = Vec::with_capacity(declared.len());
        let mut stale = Vec::new();

        for build in declared {
            let existing = current.iter().find(|e| e.source_pattern == build.src);
            match existing {
                Some(entry) if entry.builder_id == build.builder && entry.config == build.config => {
                    next.push(entry.clone());
                }
                _ => match BuildMatch::new(build, &self.catalog) {
                    Ok(entry) => {
                        if let Some(previous) = existing {
                            previous.retire();
                            outcome.replaced.push(build.src.clone());
                            stale.push(build.src.clone());
                        } else {
                            outcome.added.push(build.src.clone());
                        }
                        next.push(Arc::new(entry));
                    }
                    Err(e) => {
                        tracing::warn!(src = %build.src, error = %e, "Skipping build with invalid source glob");
                    }
                },
            }
        }

        let declared_patterns: HashSet<&str> = declared.iter().map(|b| b.src.as_str()).collect();
        for entry in current.iter() {
            if !declared_patterns.contains(entry.source_pattern.as_str()) {
                entry.retire();
                outcome.removed.push(entry.source_pattern.clone());
                stale.push(entry.source_pattern.clone());
            }
        }

        self.entries.store(Arc::new(next));

        if !stale.is_empty() {
            let dropped = self.assets.remove_where(|_, asset| {
                asset
                    .origin
                    .as_ref()
                    .is_some_and(|origin| stale.contains(&origin.source_pattern))
            });
            store::teardown(dropped).await;
        }

        if !outcome.is_unchanged() {
            tracing::info!(
                added = ?outcome.added,
                removed = ?outcome.removed,
                replaced = ?outcome.replaced,
                "Build matches reconciled"
            );
        }
        outcome
    }

    /// First declared match for `source`.
    pub fn lookup(&self, source: &str) -> Option<Arc<BuildMatch>> {
        let source = source.trim_start_matches('/');
        self.entries.load().iter().find(|e| e.matches(source)).cloned()
    }

    /// Resolve a request destination to `(entrypoint, match)`.
    ///
    /// Matches are tried in declaration order. Within a match, a file equal
    /// to the destination wins over one that adds an extension, which wins
    /// over a directory index.
    pub fn resolve_entrypoint(&self, destination: &str, files: &[String]) -> Option<(String, Arc<BuildMatch>)> {
        let wanted = destination.trim_start_matches('/').trim_end_matches('/');
        let entries = self.entries.load();

        for entry in entries.iter() {
            let candidates: Vec<&String> = files.iter().filter(|f| entry.matches(f)).collect();
            let found = candidates
                .iter()
                .find(|f| f.as_str() == wanted)
                .or_else(|| candidates.iter().find(|f| adds_extension(f, wanted)))
                .or_else(|| candidates.iter().find(|f| is_index_of(f, wanted)));
            if let Some(file) = found {
                return Some(((*file).clone(), entry.clone()));
            }
        }
        None
    }
}

/// `file` is `wanted` plus an extension.
fn adds_extension(file: &str, wanted: &str) -> bool {
    if wanted.is_empty() {
        return false;
    }
    file.strip_prefix(wanted)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|ext| !ext.is_empty() && !ext.contains('/'))
}

/// `file` is `index.<ext>` directly inside directory `wanted`.
fn is_index_of(file: &str, wanted: &str) -> bool {
    let (dir, name) = file.rsplit_once('/').unwrap_or(("", file));
    dir == wanted && name.strip_prefix("index.").is_some_and(|ext| !ext.is_empty())
}

/// Project files, relative and `/`-separated, sorted.
pub async fn scan_project_files(root: &Path) -> std::io::Result<Vec<String>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_project(&root))
        .await
        .map_err(std::io::Error::other)?
}

fn walk_project(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.file_name().to_str()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(std::io::Error::other(e)),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable project entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        if let Some(parts) = parts {
            files.push(parts.join("/"));
        }
    }
    files.sort();
    Ok(files)
}

fn is_ignored(name: Option<&str>) -> bool {
    name.is_some_and(|n| IGNORED_DIRS.contains(&n))
}
