//! Environment resolution for builds and functions.
//!
//! Project config may declare `env` / `build.env` values that reference
//! secrets (`@name`). Secrets are never resolved remotely here: the same key
//! must be present in the matching dotenv file, otherwise startup fails with
//! every missing name listed at once.
//!
//! Resolved maps are handed to builders and function handles explicitly.
//! Nothing here touches the process environment.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::loader::ConfigError;
use crate::config::schema::{ProjectConfig, ProjectPaths};

/// Prefix marking a secret reference.
pub const SECRET_PREFIX: char = '@';

pub type EnvMap = BTreeMap<String, String>;

/// Resolved runtime and build environments for a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectEnv {
    /// Passed to function handles.
    pub runtime: EnvMap,
    /// Passed to builders.
    pub build: EnvMap,
}

impl ProjectEnv {
    /// Resolve both environments from the project config and dotenv files.
    pub fn resolve(config: &ProjectConfig, paths: &ProjectPaths) -> Result<Self, ConfigError> {
        let env_path = paths.env_path();
        let build_env_path = paths.build_env_path();

        let runtime = resolve_env(&config.env, &read_env_file(&env_path)?, &env_path)?;
        let build = resolve_env(&config.build.env, &read_env_file(&build_env_path)?, &build_env_path)?;

        Ok(Self { runtime, build })
    }
}

/// Read a `KEY=VALUE` dotenv file. A missing file is an empty map.
pub fn read_env_file(path: &Path) -> Result<EnvMap, ConfigError> {
    if !path.exists() {
        return Ok(EnvMap::new());
    }

    let iter = dotenvy::from_path_iter(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = EnvMap::new();
    for item in iter {
        let (key, value) = item.map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Merge declared values with dotenv values.
///
/// Dotenv values win. A declared secret reference with no dotenv value for
/// its key is an error; all such keys are reported together.
pub fn resolve_env(declared: &EnvMap, file_values: &EnvMap, file: &Path) -> Result<EnvMap, ConfigError> {
    let mut resolved = EnvMap::new();
    let mut missing = Vec::new();

    for (key, value) in declared {
        if let Some(local) = file_values.get(key) {
            resolved.insert(key.clone(), local.clone());
        } else if value.starts_with(SECRET_PREFIX) {
            missing.push(key.clone());
        } else {
            resolved.insert(key.clone(), value.clone());
        }
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv {
            file: file.to_path_buf(),
            names: missing,
        });
    }

    for (key, value) in file_values {
        resolved.entry(key.clone()).or_insert_with(|| value.clone());
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn map(pairs: &[(&str, &str)]) -> EnvMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn reports_all_missing_secrets_at_once() {
        let declared = map(&[("A", "@a"), ("B", "plain"), ("C", "@c"), ("D", "@d")]);
        let file = map(&[("D", "from-file")]);

        let err = resolve_env(&declared, &file, &PathBuf::from(".env")).unwrap_err();
        match err {
            ConfigError::MissingEnv { names, .. } => assert_eq!(names, vec!["A", "C"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dotenv_values_override_and_extend() {
        let declared = map(&[("SECRET", "@secret"), ("MODE", "dev")]);
        let file = map(&[("SECRET", "s3cr3t"), ("EXTRA", "1")]);

        let env = resolve_env(&declared, &file, &PathBuf::from(".env")).unwrap();
        assert_eq!(env, map(&[("EXTRA", "1"), ("MODE", "dev"), ("SECRET", "s3cr3t")]));
    }

    #[test]
    fn reads_dotenv_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# comment\nTOKEN=abc\nQUOTED=\"x y\"\n").unwrap();

        let values = read_env_file(&path).unwrap();
        assert_eq!(values["TOKEN"], "abc");
        assert_eq!(values["QUOTED"], "x y");
        assert!(read_env_file(&dir.path().join("missing")).unwrap().is_empty());
    }
}
