//! Authentication bypass for well-known paths.
//!
//! Probes and discovery documents (`/healthz`, `/.well-known/agent.json`)
//! must be reachable without a token. A [`BypassMatcher`] holds the exempt
//! patterns and is consulted before either direction is processed.
//!
//! Pattern syntax:
//!
//! - `/healthz` matches exactly `/healthz`
//! - `/.well-known/*` matches any single segment below `/.well-known/`, but
//!   not `/.well-known/a/b`
//!
//! The query string is ignored when matching.

/// Patterns exempt from authentication when none are configured.
pub const DEFAULT_BYPASS_PATTERNS: &[&str] = &["/.well-known/*", "/healthz", "/readyz", "/livez"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    /// Prefix including its trailing `/`.
    SingleSegment(String),
}

impl Pattern {
    fn parse(raw: &str) -> Self {
        match raw.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => Self::SingleSegment(prefix.to_owned()),
            _ => Self::Exact(raw.to_owned()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::SingleSegment(prefix) => {
                path.strip_prefix(prefix.as_str()).is_some_and(|rest| !rest.contains('/'))
            },
        }
    }

    fn as_str(&self) -> String {
        match self {
            Self::Exact(exact) => exact.clone(),
            Self::SingleSegment(prefix) => format!("{prefix}*"),
        }
    }
}

/// Ordered set of bypass patterns.
///
/// # Examples
///
/// ```
/// use authbridge_processor::bypass::BypassMatcher;
///
/// let matcher = BypassMatcher::default_patterns();
/// assert!(matcher.matches("/.well-known/agent.json?format=json"));
/// assert!(!matcher.matches("/.well-known/nested/deep"));
/// assert!(!matcher.matches("/api/data"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassMatcher {
    patterns: Vec<Pattern>,
}

impl BypassMatcher {
    /// Creates a matcher from explicit patterns. Empty patterns are ignored.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|raw| raw.as_ref().trim().to_owned())
            .filter(|raw| !raw.is_empty())
            .map(|raw| Pattern::parse(&raw))
            .collect();
        Self { patterns }
    }

    /// Creates a matcher with [`DEFAULT_BYPASS_PATTERNS`].
    #[must_use]
    pub fn default_patterns() -> Self {
        Self::new(DEFAULT_BYPASS_PATTERNS)
    }

    /// Resolves the configured list.
    ///
    /// `None` (not configured) selects the defaults; `Some("")` disables
    /// bypass entirely; otherwise the value is a comma-separated list.
    #[must_use]
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            None => Self::default_patterns(),
            Some(list) => Self::new(list.split(',')),
        }
    }

    /// Returns `true` if `path` is exempt from authentication.
    ///
    /// An empty path never matches.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let path = path.split_once('?').map_or(path, |(path, _query)| path);
        if path.is_empty() {
            return false;
        }
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }

    /// Returns `true` if no pattern is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Configured patterns in their textual form.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.iter().map(Pattern::as_str).collect()
    }
}
