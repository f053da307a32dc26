//! Build artifact variants.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::assets::function::FunctionHandle;

/// A single output of a build, keyed by its output path in the store.
#[derive(Clone)]
pub enum BuildArtifact {
    /// A file on disk served as-is.
    StaticFile(StaticFileRef),
    /// Bytes held in memory.
    Blob(Blob),
    /// A running function that answers invocations.
    Function(FunctionAsset),
}

impl BuildArtifact {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildArtifact::StaticFile(_) => "file",
            BuildArtifact::Blob(_) => "blob",
            BuildArtifact::Function(_) => "function",
        }
    }

    pub fn as_function(&self) -> Option<&FunctionAsset> {
        match self {
            BuildArtifact::Function(function) => Some(function),
            _ => None,
        }
    }
}

impl fmt::Debug for BuildArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildArtifact::StaticFile(file) => f.debug_tuple("StaticFile").field(&file.path).finish(),
            BuildArtifact::Blob(blob) => f
                .debug_struct("Blob")
                .field("len", &blob.bytes.len())
                .field("content_type", &blob.content_type)
                .finish(),
            BuildArtifact::Function(function) => f
                .debug_struct("Function")
                .field("entrypoint", &function.entrypoint)
                .finish(),
        }
    }
}

/// Reference to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFileRef {
    pub path: PathBuf,
}

/// In-memory content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    /// Explicit content type; guessed from the path when absent.
    pub content_type: Option<String>,
}

/// A built function.
#[derive(Debug, Clone)]
pub struct FunctionAsset {
    pub handle: Arc<dyn FunctionHandle>,
    pub built_at: SystemTime,
    /// Source file the function was built from.
    pub entrypoint: String,
}

impl FunctionAsset {
    pub fn new(handle: Arc<dyn FunctionHandle>, entrypoint: impl Into<String>) -> Self {
        Self {
            handle,
            built_at: SystemTime::now(),
            entrypoint: entrypoint.into(),
        }
    }
}
