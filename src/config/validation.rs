//! Project configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject unsupported schema versions
//! - Check that every route pattern compiles and every build glob parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: ProjectConfig → Result<(), Vec<ValidationError>>
//! - Runs before a project snapshot is accepted into the server

use thiserror::Error;

use crate::config::schema::{ProjectConfig, SUPPORTED_VERSION};
use crate::routing::matcher::compile_pattern;

/// A single semantic problem with a project configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("unsupported version {found:?} (only version {supported} is supported)")]
    UnsupportedVersion { found: Option<u64>, supported: u64 },

    #[error("route #{index} has an invalid pattern `{pattern}`: {reason}")]
    InvalidRoutePattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("route #{index} has invalid status {status}")]
    InvalidRouteStatus { index: usize, status: u16 },

    #[error("build #{index} is missing `{field}`")]
    MissingBuildField { index: usize, field: &'static str },

    #[error("build #{index} has an invalid glob `{src}`: {reason}")]
    InvalidBuildGlob {
        index: usize,
        src: String,
        reason: String,
    },
}

/// Validate a parsed project configuration.
pub fn validate_project(config: &ProjectConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.version != Some(SUPPORTED_VERSION) {
        errors.push(ValidationError::UnsupportedVersion {
            found: config.version,
            supported: SUPPORTED_VERSION,
        });
    }

    for (index, rule) in config.routes.iter().enumerate() {
        if let Err(e) = compile_pattern(&rule.match_pattern) {
            errors.push(ValidationError::InvalidRoutePattern {
                index,
                pattern: rule.match_pattern.clone(),
                reason: e.to_string(),
            });
        }
        if let Some(status) = rule.status {
            if !(100..=599).contains(&status) {
                errors.push(ValidationError::InvalidRouteStatus { index, status });
            }
        }
    }

    for (index, build) in config.builds.iter().enumerate() {
        if build.src.trim().is_empty() {
            errors.push(ValidationError::MissingBuildField { index, field: "src" });
        } else if let Err(e) = globset::Glob::new(&build.src) {
            errors.push(ValidationError::InvalidBuildGlob {
                index,
                src: build.src.clone(),
                reason: e.to_string(),
            });
        }
        if build.builder.trim().is_empty() {
            errors.push(ValidationError::MissingBuildField { index, field: "use" });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
