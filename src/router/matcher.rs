//! Path matchers for routes.
//!
//! Three kinds of matcher are supported:
//!
//! | Matcher              | Example                     | Matches                     | Params                      |
//! |----------------------|-----------------------------|-----------------------------|-----------------------------|
//! | pattern              | `/users/:id`                | `/users/42`                 | `id → "42"`                 |
//! | pattern (wildcard)   | `/files/*`                  | `/files/docs/readme.txt`    | `wildcard → "/docs/readme.txt"` |
//! | regex                | `(?i)upload\.action`        | `/api/Upload.action`        | named capture groups        |
//! | predicate            | `\|p\| p.ends_with(".do")`  | anything the closure accepts| *(none)*                    |
//!
//! Every matcher is evaluated against the whole path on every call and keeps
//! no state between calls, so a route never "remembers" a previous request.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::context::Parameters;

/// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
pub enum Segment {
    Static(String),
    Parameter(String),
}

/// A compiled route pattern string.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// One exact path, e.g. `/users`.
    Exact(String),
    /// A fixed number of segments, some of them named captures, e.g. `/users/:id`.
    Parameterized { segments: Vec<Segment> },
    /// Any path under a prefix, e.g. `/files/*`.
    Wildcard(String),
}

impl Pattern {
    /// Compiles a pattern string.
    ///
    /// Classification, in order: a trailing `/*` makes a wildcard, a `:`
    /// makes a parameterized pattern, anything else is exact. A trailing
    /// slash (other than on `/`) is ignored, so `/users/` and `/users` compile
    /// to the same pattern.
    pub fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<Parameters> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(Parameters::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = Parameters::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = Parameters::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Decides whether a route applies to a request path.
#[derive(Clone)]
pub enum PathMatcher {
    Pattern(Pattern),
    /// Matches when the regex finds a match anywhere in the path.
    Regex(Regex),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl PathMatcher {
    /// A pattern matcher, see [`Pattern::parse`].
    pub fn pattern(pattern: &str) -> Self {
        Self::Pattern(Pattern::parse(pattern))
    }

    /// A regex matcher.
    ///
    /// # Errors
    ///
    /// Returns the [`regex::Error`] if `re` does not compile.
    pub fn regex(re: &str) -> Result<Self, regex::Error> {
        Regex::new(re).map(Self::Regex)
    }

    /// A matcher backed by an arbitrary predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Matches `path`, returning captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<Parameters> {
        match self {
            Self::Pattern(pattern) => pattern.matches(path),
            Self::Regex(re) => {
                let caps = re.captures(path)?;
                let mut params = Parameters::new();
                for name in re.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        params.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                Some(params)
            }
            Self::Predicate(f) => f(path).then(Parameters::new),
        }
    }
}

impl From<&str> for PathMatcher {
    fn from(pattern: &str) -> Self {
        Self::pattern(pattern)
    }
}

impl From<Regex> for PathMatcher {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
