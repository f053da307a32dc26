//! Process-wide asset store.
//!
//! # Responsibilities
//! - Map logical output paths to artifacts
//! - Resolve directory-index lookups (`blog/` and `blog` → `blog/index.html`)
//! - Tear down functions that leave the store
//!
//! # Design Decisions
//! - Keys carry no leading slash
//! - Entries are `Arc`-wrapped and swapped whole, so readers see either the
//!   old or the new artifact
//! - No TTL: entries live until replaced, removed, or the server stops

use std::sync::Arc;

use dashmap::DashMap;

use crate::assets::artifact::BuildArtifact;
use crate::observability::metrics;

/// Where a stored artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOrigin {
    /// Build source pattern that produced the artifact.
    pub source_pattern: String,
    /// Source file the build ran for.
    pub entrypoint: String,
}

/// A stored artifact plus its provenance.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub artifact: BuildArtifact,
    pub origin: Option<AssetOrigin>,
}

impl AssetEntry {
    pub fn new(artifact: BuildArtifact, origin: Option<AssetOrigin>) -> Self {
        Self { artifact, origin }
    }
}

/// Result of a store lookup.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    /// Key the entry is stored under.
    pub key: String,
    pub entry: Arc<AssetEntry>,
}

/// Concurrent map from logical path to artifact.
#[derive(Debug, Default)]
pub struct AssetStore {
    entries: DashMap<String, Arc<AssetEntry>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `path`, falling back to a directory index entry.
    pub fn get(&self, path: &str) -> Option<ResolvedAsset> {
        let key = normalize_key(path);
        if let Some(entry) = self.entries.get(key) {
            return Some(ResolvedAsset {
                key: key.to_string(),
                entry: entry.value().clone(),
            });
        }

        let dir = key.trim_end_matches('/');
        let mut candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|e| strip_index(e.key()) == Some(dir))
            .map(|e| e.key().clone())
            .collect();
        candidates.sort();

        let preferred = candidates
            .iter()
            .position(|k| k.rsplit('/').next() == Some("index.html"))
            .unwrap_or(0);
        let key = candidates.into_iter().nth(preferred)?;
        let entry = self.entries.get(&key)?.value().clone();
        Some(ResolvedAsset { key, entry })
    }

    /// Store `entry` under `path`, returning whatever it replaced.
    pub fn put(&self, path: &str, entry: AssetEntry) -> Option<Arc<AssetEntry>> {
        self.insert(path, Arc::new(entry))
    }

    /// Like [`AssetStore::put`], keeping the caller's `Arc`.
    pub fn insert(&self, path: &str, entry: Arc<AssetEntry>) -> Option<Arc<AssetEntry>> {
        let previous = self.entries.insert(normalize_key(path).to_string(), entry);
        metrics::record_asset_count(self.entries.len());
        previous
    }

    /// Remove `path` only while it still holds `entry`.
    pub fn remove_exact(&self, path: &str, entry: &Arc<AssetEntry>) -> Option<Arc<AssetEntry>> {
        let removed = self
            .entries
            .remove_if(normalize_key(path), |_, current| Arc::ptr_eq(current, entry))
            .map(|(_, entry)| entry);
        metrics::record_asset_count(self.entries.len());
        removed
    }

    pub fn remove(&self, path: &str) -> Option<Arc<AssetEntry>> {
        let removed = self.entries.remove(normalize_key(path)).map(|(_, entry)| entry);
        metrics::record_asset_count(self.entries.len());
        removed
    }

    /// Remove every entry matching `predicate`.
    pub fn remove_where<F>(&self, predicate: F) -> Vec<Arc<AssetEntry>>
    where
        F: Fn(&str, &AssetEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| predicate(e.key(), e.value()))
            .map(|e| e.key().clone())
            .collect();

        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key).map(|(_, entry)| entry))
            .collect();
        metrics::record_asset_count(self.entries.len());
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) -> Vec<Arc<AssetEntry>> {
        self.remove_where(|_, _| true)
    }

    /// Exact-key membership, without index fallback.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(normalize_key(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Destroy every function among `entries`.
pub async fn teardown<I>(entries: I)
where
    I: IntoIterator<Item = Arc<AssetEntry>>,
{
    for entry in entries {
        destroy_artifact(&entry.artifact).await;
    }
}

/// Destroy `artifact` if it is a function.
pub async fn destroy_artifact(artifact: &BuildArtifact) {
    if let Some(function) = artifact.as_function() {
        tracing::debug!(entrypoint = %function.entrypoint, "Destroying function");
        function.handle.destroy().await;
    }
}

fn normalize_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// `dir/index.ext` → `dir`, `index.ext` → ``.
fn strip_index(key: &str) -> Option<&str> {
    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", key),
    };
    let ext = file.strip_prefix("index.")?;
    if ext.is_empty() {
        None
    } else {
        Some(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::artifact::{Blob, StaticFileRef};
    use bytes::Bytes;

    fn blob(text: &'static str) -> AssetEntry {
        AssetEntry::new(
            BuildArtifact::Blob(Blob {
                bytes: Bytes::from_static(text.as_bytes()),
                content_type: None,
            }),
            None,
        )
    }

    fn blob_text(resolved: &ResolvedAsset) -> Bytes {
        match &resolved.entry.artifact {
            BuildArtifact::Blob(blob) => blob.bytes.clone(),
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn index_resolves_by_directory() {
        let store = AssetStore::new();
        store.put("blog/index.html", blob("blog"));

        assert_eq!(store.get("blog/").unwrap().key, "blog/index.html");
        assert_eq!(store.get("blog").unwrap().key, "blog/index.html");
        assert_eq!(store.get("/blog").unwrap().key, "blog/index.html");
        assert!(store.get("blo").is_none());
    }

    #[test]
    fn root_index_and_html_preference() {
        let store = AssetStore::new();
        store.put("index.css", blob("css"));
        store.put("index.html", blob("html"));

        let resolved = store.get("/").unwrap();
        assert_eq!(resolved.key, "index.html");
        assert_eq!(&blob_text(&resolved)[..], b"html");
    }

    #[test]
    fn direct_entries_win_over_index() {
        let store = AssetStore::new();
        store.put("docs", blob("direct"));
        store.put("docs/index.html", blob("index"));
        assert_eq!(store.get("docs").unwrap().key, "docs");
    }

    #[test]
    fn put_replaces_and_returns_previous() {
        let store = AssetStore::new();
        assert!(store.put("a.txt", blob("one")).is_none());
        let previous = store.put("/a.txt", blob("two")).unwrap();

        assert!(matches!(previous.artifact, BuildArtifact::Blob(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(&blob_text(&store.get("a.txt").unwrap())[..], b"two");
    }

    #[test]
    fn remove_exact_skips_replaced_entries() {
        let store = AssetStore::new();
        let first = Arc::new(blob("one"));
        store.insert("a.txt", first.clone());

        let second = Arc::new(blob("two"));
        store.insert("a.txt", second.clone());
        assert!(store.remove_exact("a.txt", &first).is_none());
        assert_eq!(&blob_text(&store.get("a.txt").unwrap())[..], b"two");

        assert!(store.remove_exact("/a.txt", &second).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn remove_where_filters_by_origin() {
        let store = AssetStore::new();
        let origin = |pattern: &str| {
            Some(AssetOrigin {
                source_pattern: pattern.to_string(),
                entrypoint: "x".to_string(),
            })
        };
        let file = |p: &str| BuildArtifact::StaticFile(StaticFileRef { path: p.into() });
        store.put("a", AssetEntry::new(file("/a"), origin("a/**")));
        store.put("b", AssetEntry::new(file("/b"), origin("b/**")));

        let removed = store.remove_where(|_, e| e.origin.as_ref().is_some_and(|o| o.source_pattern == "a/**"));
        assert_eq!(removed.len(), 1);
        assert_eq!(store.keys(), vec!["b"]);
    }
}
