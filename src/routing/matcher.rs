//! Route pattern compilation and placeholder substitution.
//!
//! # Responsibilities
//! - Compile a rule's `src` into an anchored capturing regex, once
//! - Match a pathname (falling back to the pathname without its leading `/`)
//! - Substitute `$1..$n` and `$name` placeholders from captures
//!
//! # Design Decisions
//! - Patterns are anchored on both ends; an explicit `^`/`$` is respected
//! - Unmatched or unknown placeholders substitute the empty string
//! - No state beyond the compiled regex, so matching is repeatable

use regex::{Captures, Regex};

use crate::config::schema::RouteRule;

/// Compile a route pattern into an anchored regex.
pub fn compile_pattern(src: &str) -> Result<Regex, regex::Error> {
    let inner = src.strip_prefix('^').unwrap_or(src);
    let inner = match inner.strip_suffix('$') {
        Some(stripped) if !stripped.ends_with('\\') => stripped,
        _ => inner,
    };
    Regex::new(&format!("^(?:{inner})$"))
}

/// A route rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: RouteRule,
    pattern: Regex,
}

impl CompiledRule {
    pub fn new(rule: RouteRule) -> Result<Self, regex::Error> {
        let pattern = compile_pattern(&rule.match_pattern)?;
        Ok(Self { rule, pattern })
    }

    /// Match `pathname`, retrying without the leading `/`.
    pub fn captures<'p>(&self, pathname: &'p str) -> Option<Captures<'p>> {
        self.pattern.captures(pathname).or_else(|| {
            pathname
                .strip_prefix('/')
                .and_then(|trimmed| self.pattern.captures(trimmed))
        })
    }
}

/// Replace `$n` / `$name` placeholders in `template` with captured text.
pub fn substitute(template: &str, caps: &Captures<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = placeholder_len(after);
        if len == 0 {
            out.push('$');
            rest = after;
            continue;
        }

        let name = &after[..len];
        let value = match name.parse::<usize>() {
            Ok(index) => caps.get(index),
            Err(_) => caps.name(name),
        };
        if let Some(m) = value {
            out.push_str(m.as_str());
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

fn placeholder_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_digit() => bytes.iter().take_while(|b| b.is_ascii_digit()).count(),
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_are_anchored() {
        let re = compile_pattern("/api/(.*)").unwrap();
        assert!(re.is_match("/api/users"));
        assert!(!re.is_match("/v1/api/users"));

        let alt = compile_pattern("/a|/b").unwrap();
        assert!(alt.is_match("/b"));
        assert!(!alt.is_match("/b/c"));

        let explicit = compile_pattern("^/exact$").unwrap();
        assert!(explicit.is_match("/exact"));
        assert!(!explicit.is_match("/exact/"));
    }

    #[test]
    fn substitutes_numbered_and_named_groups() {
        let rule = CompiledRule::new(RouteRule::new("/blog/(?P<year>\\d+)/(.*)")).unwrap();
        let caps = rule.captures("/blog/2019/hello").unwrap();

        assert_eq!(substitute("/posts/$2?y=$year", &caps), "/posts/hello?y=2019");
        assert_eq!(substitute("$1-$9-$missing-$", &caps), "2019---$");
        assert_eq!(substitute("cost: $$1", &caps), "cost: $2019");
    }

    #[test]
    fn falls_back_to_path_without_leading_slash() {
        let rule = CompiledRule::new(RouteRule::new("(.*)\\.html")).unwrap();
        let caps = rule.captures("/index.html").unwrap();
        assert_eq!(&caps[1], "/index");

        let rule = CompiledRule::new(RouteRule::new("about")).unwrap();
        assert!(rule.captures("/about").is_some());
    }
}
