//! Route table and routing decisions.
//!
//! # Responsibilities
//! - Store compiled route rules in declaration order
//! - Evaluate a request path against them and produce a [`RouteDecision`]
//!
//! # Design Decisions
//! - Immutable after construction (shared via Arc without locks)
//! - First non-continuing match wins; continuing rules accumulate headers
//!   and may rewrite the working path
//! - Always returns a decision: no match means "serve the path as-is"

use std::collections::BTreeMap;

use thiserror::Error;
use url::Url;

use crate::config::schema::RouteRule;
use crate::routing::matcher::{substitute, CompiledRule};

/// Statuses that turn a match into a redirect.
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// What the request server should do with a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Resolve the destination against the asset store.
    Local,
    /// Forward the request to an absolute URL.
    Proxy,
    /// Answer with a redirect to `location`.
    Redirect { location: String },
}

/// Result of evaluating a path against a route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub action: RouteAction,
    /// Pathname for local decisions, verbatim target otherwise.
    pub destination: String,
    /// Status declared by the matched rule, if any.
    pub status: Option<u16>,
    /// Accumulated response headers, lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Request query merged with the destination's query.
    pub captured_args: BTreeMap<String, String>,
    pub matched_rule: Option<usize>,
}

impl RouteDecision {
    /// Effective status code (200 unless a rule declared one).
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(200)
    }
}

/// A route pattern failed to compile.
#[derive(Debug, Error)]
#[error("route #{index} has an invalid pattern `{pattern}`: {reason}")]
pub struct RouteCompileError {
    pub index: usize,
    pub pattern: String,
    pub reason: String,
}

/// Compiled, ordered route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<CompiledRule>,
}

impl RouteTable {
    /// Compile every rule's pattern up front.
    pub fn compile(rules: &[RouteRule]) -> Result<Self, RouteCompileError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                CompiledRule::new(rule.clone()).map_err(|e| RouteCompileError {
                    index,
                    pattern: rule.match_pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Route `request_path` (pathname plus optional query).
    pub fn resolve(&self, request_path: &str) -> RouteDecision {
        resolve_route(request_path, self)
    }
}

/// Evaluate `request_path` against `table`.
pub fn resolve_route(request_path: &str, table: &RouteTable) -> RouteDecision {
    let (pathname, query) = split_path(request_path);
    let request_args = parse_query(query);
    let mut working = if pathname.is_empty() {
        "/".to_string()
    } else {
        pathname.to_string()
    };
    let mut headers = BTreeMap::new();

    for (index, compiled) in table.rules.iter().enumerate() {
        let Some(caps) = compiled.captures(&working) else {
            continue;
        };
        let rule = &compiled.rule;

        let destination = match &rule.dest_template {
            Some(template) => substitute(template, &caps),
            None => working.clone(),
        };
        for (name, value) in &rule.headers {
            headers.insert(name.to_ascii_lowercase(), substitute(value, &caps));
        }

        if rule.continue_matching {
            working = destination;
            continue;
        }

        if let Some(status) = rule.status.filter(|s| REDIRECT_STATUSES.contains(s)) {
            let location = headers
                .get("location")
                .cloned()
                .unwrap_or_else(|| destination.clone());
            return RouteDecision {
                action: RouteAction::Redirect { location },
                destination,
                status: Some(status),
                headers,
                captured_args: request_args,
                matched_rule: Some(index),
            };
        }

        if is_absolute_url(&destination) {
            return RouteDecision {
                action: RouteAction::Proxy,
                destination,
                status: rule.status,
                headers,
                captured_args: request_args,
                matched_rule: Some(index),
            };
        }

        let destination = if destination.starts_with('/') {
            destination
        } else {
            format!("/{destination}")
        };
        let (dest_path, dest_query) = split_path(&destination);
        let mut captured_args = request_args;
        captured_args.extend(parse_query(dest_query));

        return RouteDecision {
            action: RouteAction::Local,
            destination: dest_path.to_string(),
            status: rule.status,
            headers,
            captured_args,
            matched_rule: Some(index),
        };
    }

    RouteDecision {
        action: RouteAction::Local,
        destination: working,
        status: None,
        headers,
        captured_args: request_args,
        matched_rule: None,
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.split_once('?') {
        Some((pathname, query)) => (pathname, query),
        None => (path, ""),
    }
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// True for scheme-qualified http(s) destinations.
pub fn is_absolute_url(destination: &str) -> bool {
    Url::parse(destination)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
