//! Configuration loading from disk.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::env::ProjectEnv;
use crate::config::schema::{DevConfig, ProjectConfig, ProjectPaths};
use crate::config::validation::{validate_project, ValidationError};
use crate::routing::router::RouteTable;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("the following env vars are not defined in {}: {}", .file.display(), .names.join(", "))]
    MissingEnv { file: PathBuf, names: Vec<String> },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigError {
    /// True when the project declares a schema version this server can't run.
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, ConfigError::Validation(errors)
            if errors.iter().any(|e| matches!(e, ValidationError::UnsupportedVersion { .. })))
    }
}

/// Load the dev server configuration from a TOML file.
pub fn load_dev_config(path: &Path) -> Result<DevConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse and validate a project config document.
pub fn parse_project_config(path: &Path, raw: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig = serde_json::from_str(raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    validate_project(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Read the raw project config. `None` when the project has no config file.
pub async fn read_project_source(path: &Path) -> Result<Option<String>, ConfigError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A validated, compiled view of the project at one point in time.
#[derive(Debug)]
pub struct ProjectSnapshot {
    /// Raw file content this snapshot was built from.
    pub source: Option<String>,
    pub config: ProjectConfig,
    pub routes: RouteTable,
    pub env: ProjectEnv,
}

impl ProjectSnapshot {
    /// Build a snapshot from raw project config content.
    pub fn from_source(source: Option<String>, paths: &ProjectPaths) -> Result<Self, ConfigError> {
        let config = match &source {
            Some(raw) => parse_project_config(&paths.config_path(), raw)?,
            None => ProjectConfig::implicit(),
        };

        let routes = RouteTable::compile(&config.routes).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::InvalidRoutePattern {
                index: e.index,
                pattern: e.pattern,
                reason: e.reason,
            }])
        })?;
        let env = ProjectEnv::resolve(&config, paths)?;

        Ok(Self {
            source,
            config,
            routes,
            env,
        })
    }

    /// Read and build a snapshot from disk.
    pub async fn load(paths: &ProjectPaths) -> Result<Self, ConfigError> {
        let source = read_project_source(&paths.config_path()).await?;
        Self::from_source(source, paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(dir: &Path) -> ProjectPaths {
        ProjectPaths {
            root: dir.to_path_buf(),
            ..ProjectPaths::default()
        }
    }

    #[tokio::test]
    async fn missing_project_file_serves_statically() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ProjectSnapshot::load(&paths_in(dir.path())).await.unwrap();

        assert!(snapshot.source.is_none());
        assert_eq!(snapshot.config, ProjectConfig::implicit());
        assert!(snapshot.routes.is_empty());
    }

    #[tokio::test]
    async fn unsupported_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("now.json"), r#"{ "version": 1 }"#).unwrap();

        let err = ProjectSnapshot::load(&paths_in(dir.path())).await.unwrap_err();
        assert!(err.is_unsupported_version());
        assert!(err.to_string().contains("unsupported version"));
    }

    #[tokio::test]
    async fn missing_secret_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("now.json"),
            r#"{ "version": 2, "env": { "DB": "@db", "KEY": "@key" } }"#,
        )
        .unwrap();

        let err = ProjectSnapshot::load(&paths_in(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("DB, KEY"), "{err}");
    }

    #[test]
    fn loads_dev_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.toml");
        std::fs::write(
            &path,
            "[listener]\nbind_address = \"0.0.0.0:4000\"\n[builds]\nrebuild_window_ms = 500\n",
        )
        .unwrap();

        let config = load_dev_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:4000");
        assert_eq!(config.builds.rebuild_window_ms, 500);
        assert_eq!(config.observability.log_level, "info");
    }
}
