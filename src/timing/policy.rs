use std::fmt;

use axum::http::Method;
use regex::Regex;

/// Timing target for one route pattern. Looked up per request, never
/// mutated in place — re-registering a pattern installs a fresh policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingPolicy {
    /// Target mean latency the endpoint should appear to have.
    pub baseline_ms: f64,
    /// Amplitude of the random offset applied around the baseline.
    pub jitter_range_ms: f64,
    pub enabled: bool,
}

impl TimingPolicy {
    pub fn new(baseline_ms: f64, jitter_range_ms: f64) -> Self {
        Self {
            baseline_ms,
            jitter_range_ms,
            enabled: true,
        }
    }

    pub fn disabled(baseline_ms: f64, jitter_range_ms: f64) -> Self {
        Self {
            baseline_ms,
            jitter_range_ms,
            enabled: false,
        }
    }
}

/// Pattern problems are configuration errors: they abort startup rather
/// than surfacing at request time.
#[derive(Debug)]
pub enum PolicyError {
    EmptyPattern,
    BadMethod(String),
    BadPattern { pattern: String, source: regex::Error },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPattern => write!(f, "empty route pattern"),
            Self::BadMethod(m) => write!(f, "invalid HTTP method '{m}' in route pattern"),
            Self::BadPattern { pattern, source } => {
                write!(f, "route pattern '{pattern}' failed to compile: {source}")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// The reserved pattern name for the unconditional fallback policy.
pub const DEFAULT_PATTERN: &str = "default";

struct PolicyEntry {
    pattern: String,
    method: Option<Method>,
    path_regex: Regex,
    policy: TimingPolicy,
}

/// Ordered route-pattern → policy registry.
///
/// Patterns support `:param` segment wildcards and a trailing `*`, and may
/// carry a leading `"METHOD "` prefix to constrain the HTTP method
/// (`"POST /api/accounts"`); without one they match any method. Entries are
/// checked in registration order and the first match wins, so two patterns
/// are allowed to overlap — registration order is part of the contract.
/// The literal `default` pattern never participates in that iteration; it
/// is the final fallback and always exists.
pub struct PolicySet {
    entries: Vec<PolicyEntry>,
    default: TimingPolicy,
}

impl PolicySet {
    /// Fallback mirrors the production config: 15ms ± 3ms.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: TimingPolicy::new(15.0, 3.0),
        }
    }

    /// Registers or replaces the policy for `pattern`. Replacement keeps
    /// the pattern's original position in the match order.
    pub fn set_policy(&mut self, pattern: &str, policy: TimingPolicy) -> Result<(), PolicyError> {
        if pattern.trim().is_empty() {
            return Err(PolicyError::EmptyPattern);
        }
        if pattern == DEFAULT_PATTERN {
            self.default = policy;
            return Ok(());
        }

        let (method, path_pattern) = split_method_prefix(pattern)?;
        let path_regex = compile_pattern(path_pattern)?;

        let entry = PolicyEntry {
            pattern: pattern.to_owned(),
            method,
            path_regex,
            policy,
        };

        if let Some(existing) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Resolves the policy for a request. First registered match wins;
    /// falls back to the `default` policy.
    pub fn resolve(&self, method: &Method, path: &str) -> &TimingPolicy {
        self.entries
            .iter()
            .find(|e| {
                e.method.as_ref().map_or(true, |m| m == method) && e.path_regex.is_match(path)
            })
            .map(|e| &e.policy)
            .unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &TimingPolicy {
        &self.default
    }

    /// Registered patterns with their policies, in match order, default last.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimingPolicy)> {
        self.entries
            .iter()
            .map(|e| (e.pattern.as_str(), &e.policy))
            .chain(std::iter::once((DEFAULT_PATTERN, &self.default)))
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new()
    }
}

fn split_method_prefix(pattern: &str) -> Result<(Option<Method>, &str), PolicyError> {
    match pattern.split_once(' ') {
        Some((head, rest)) if !head.starts_with('/') => {
            let method = Method::from_bytes(head.as_bytes())
                .map_err(|_| PolicyError::BadMethod(head.to_owned()))?;
            Ok((Some(method), rest.trim_start()))
        }
        _ => Ok((None, pattern)),
    }
}

/// `:param` segments become `[^/]+`, a `*` becomes `.*`, everything else is
/// matched literally. The result is anchored on both ends.
fn compile_pattern(pattern: &str) -> Result<Regex, PolicyError> {
    let mut regex_src = String::with_capacity(pattern.len() + 8);
    regex_src.push('^');
    for segment in pattern.split('/') {
        if segment.starts_with(':') && segment.len() > 1 {
            regex_src.push_str("[^/]+");
        } else if segment == "*" {
            regex_src.push_str(".*");
        } else {
            regex_src.push_str(&regex::escape(segment));
        }
        regex_src.push('/');
    }
    regex_src.pop(); // trailing '/'
    regex_src.push('$');

    Regex::new(&regex_src).map_err(|source| PolicyError::BadPattern {
        pattern: pattern.to_owned(),
        source,
    })
}
