//! Configuration schema definitions.
//!
//! Two documents are described here:
//! - [`DevConfig`]: how the dev server itself runs (listener, project
//!   location, rebuild window, watching, observability). Read from TOML.
//! - [`ProjectConfig`]: the project's declarative `now.json` (routes,
//!   builds, env). Read from JSON and re-read before each routed request.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The only project schema version the dev server understands.
pub const SUPPORTED_VERSION: u64 = 2;

/// Root configuration for the dev server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DevConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Where the project lives and which files describe it.
    pub project: ProjectPaths,

    /// Build dispatch tuning.
    pub builds: BuildSettings,

    /// Source file watching.
    pub watch: WatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Project location and the names of the files read from it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectPaths {
    /// Project root directory.
    pub root: PathBuf,

    /// Project configuration file, relative to `root`.
    pub config_file: String,

    /// Runtime dotenv file, relative to `root`.
    pub env_file: String,

    /// Build-time dotenv file, relative to `root`.
    pub build_env_file: String,
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            config_file: "now.json".to_string(),
            env_file: ".env".to_string(),
            build_env_file: ".env.build".to_string(),
        }
    }
}

impl ProjectPaths {
    pub fn config_path(&self) -> PathBuf {
        self.root.join(&self.config_file)
    }

    pub fn env_path(&self) -> PathBuf {
        self.root.join(&self.env_file)
    }

    pub fn build_env_path(&self) -> PathBuf {
        self.root.join(&self.build_env_file)
    }
}

/// Build dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildSettings {
    /// A rebuild requested this soon after the previous successful build of
    /// the same entrypoint is served from cache instead.
    pub rebuild_window_ms: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            rebuild_window_ms: 2000,
        }
    }
}

impl BuildSettings {
    pub fn rebuild_window(&self) -> Duration {
        Duration::from_millis(self.rebuild_window_ms)
    }
}

/// Source file watching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Invalidate cached builds when their entrypoint changes on disk.
    pub enabled: bool,

    /// Poll interval used by polling backends.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2000,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// The project's `now.json`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ProjectConfig {
    /// Schema version; must equal [`SUPPORTED_VERSION`].
    #[serde(default)]
    pub version: Option<u64>,

    /// Ordered route table.
    #[serde(default)]
    pub routes: Vec<RouteRule>,

    /// Declared build sources.
    #[serde(default)]
    pub builds: Vec<BuildConfig>,

    /// Runtime environment for functions.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Build-time settings.
    #[serde(default)]
    pub build: BuildSection,
}

impl ProjectConfig {
    /// Configuration used when the project has no config file: every file is
    /// served as-is through the static builder.
    pub fn implicit() -> Self {
        Self {
            version: Some(SUPPORTED_VERSION),
            builds: vec![BuildConfig {
                src: "**".to_string(),
                builder: crate::builds::builtin::STATIC_BUILDER.to_string(),
                config: serde_json::Map::new(),
            }],
            ..Self::default()
        }
    }
}

/// The `build` section of the project config.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BuildSection {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A single route rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteRule {
    /// Regex-capable path pattern.
    #[serde(rename = "src", alias = "matchPattern")]
    pub match_pattern: String,

    /// Destination with `$1..$n` / `$name` placeholders.
    #[serde(rename = "dest", alias = "destTemplate", default, skip_serializing_if = "Option::is_none")]
    pub dest_template: Option<String>,

    /// Response status (redirect codes stop matching).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Headers added to the response.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Keep evaluating later rules after this one matches.
    #[serde(rename = "continue", alias = "continueMatching", default)]
    pub continue_matching: bool,
}

impl RouteRule {
    pub fn new(match_pattern: impl Into<String>) -> Self {
        Self {
            match_pattern: match_pattern.into(),
            dest_template: None,
            status: None,
            headers: BTreeMap::new(),
            continue_matching: false,
        }
    }

    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest_template = Some(dest.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn continuing(mut self) -> Self {
        self.continue_matching = true;
        self
    }
}

/// A declared build source.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BuildConfig {
    /// Glob selecting entrypoints.
    pub src: String,

    /// Builder identifier.
    #[serde(rename = "use")]
    pub builder: String,

    /// Builder-specific configuration.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl BuildConfig {
    pub fn new(src: impl Into<String>, builder: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            builder: builder.into(),
            config: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_config_uses_wire_names() {
        let raw = r#"{
            "version": 2,
            "builds": [{ "src": "api/*.sh", "use": "@now/exec", "config": { "command": ["sh"] } }],
            "routes": [
                { "src": "/old/(.*)", "dest": "/new/$1", "status": 301 },
                { "src": "/api/(.*)", "headers": { "X-Api": "1" }, "continue": true }
            ],
            "env": { "TOKEN": "@token" },
            "build": { "env": { "NODE_ENV": "development" } }
        }"#;
        let config: ProjectConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.version, Some(2));
        assert_eq!(config.builds[0].builder, "@now/exec");
        assert_eq!(config.routes[0].dest_template.as_deref(), Some("/new/$1"));
        assert_eq!(config.routes[0].status, Some(301));
        assert!(config.routes[1].continue_matching);
        assert_eq!(config.routes[1].headers["X-Api"], "1");
        assert_eq!(config.build.env["NODE_ENV"], "development");
    }

    #[test]
    fn dev_config_defaults_from_empty_toml() {
        let config: DevConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.builds.rebuild_window(), Duration::from_secs(2));
        assert_eq!(config.project.config_path(), PathBuf::from("./now.json"));
        assert!(config.watch.enabled);
    }
}
