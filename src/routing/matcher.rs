//! URL pattern matching.
//!
//! # Responsibilities
//! - Normalize URLs (trim segments, lowercase, single leading slash)
//! - Compile configured URLs into segment patterns
//! - Match request segments against a pattern and bind path arguments
//!
//! # Design Decisions
//! - Matching is case-insensitive; argument values keep the request's case
//! - `{name}` matches and binds any one segment
//! - `*` matches any one segment, `prefix*` matches a segment starting with prefix
//! - A pattern ending in `*` also accepts longer input URLs
//! - No regex in the hot path

use std::collections::BTreeMap;

/// Split a URL into trimmed, non-empty segments.
pub fn split_segments(url: &str) -> Vec<&str> {
    url.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Canonical form used as the route table key.
pub fn normalize_url(url: &str) -> String {
    let segments = split_segments(url);
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(url.len());
    for s in segments {
        out.push('/');
        out.push_str(&s.to_lowercase());
    }
    out
}

/// Whether a configured URL needs pattern matching rather than an exact lookup.
pub fn is_pattern(url: &str) -> bool {
    url.contains('{') || url.contains('}') || url.contains('*')
}

/// Why a configured URL could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("wildcard url segment must not mix arguments with *, actual: {0}")]
    MixedArgumentAndWildcard(String),
    #[error("argument url segment must be enclosed in curly brackets, actual: {0}")]
    InvalidArgument(String),
    #[error("wildcard url segment must end with a single *, actual: {0}")]
    InvalidWildcard(String),
}

/// One compiled segment of a configured URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Any,
    Prefix(String),
}

impl Segment {
    fn parse(s: &str) -> Result<Self, PatternError> {
        if s.contains('{') || s.contains('}') {
            if s.contains('*') {
                return Err(PatternError::MixedArgumentAndWildcard(s.to_string()));
            }
            let name = s
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
                .filter(|name| !name.is_empty() && !name.contains('{') && !name.contains('}'))
                .ok_or_else(|| PatternError::InvalidArgument(s.to_string()))?;
            return Ok(Segment::Param(name.to_string()));
        }
        if s == "*" {
            return Ok(Segment::Any);
        }
        if s.contains('*') {
            let prefix = s
                .strip_suffix('*')
                .filter(|p| !p.contains('*'))
                .ok_or_else(|| PatternError::InvalidWildcard(s.to_string()))?;
            return Ok(Segment::Prefix(prefix.to_string()));
        }
        Ok(Segment::Literal(s.to_string()))
    }

    fn matches(&self, input: &str) -> bool {
        match self {
            Segment::Param(_) | Segment::Any => true,
            Segment::Prefix(prefix) => input.to_lowercase().starts_with(prefix.as_str()),
            Segment::Literal(lit) => input.to_lowercase() == *lit,
        }
    }
}

/// A compiled wildcard or parameterized URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    url: String,
    segments: Vec<Segment>,
    open_ended: bool,
}

impl UrlPattern {
    /// Compile a URL. The input is normalized first.
    pub fn compile(url: &str) -> Result<Self, PatternError> {
        let url = normalize_url(url);
        let segments = split_segments(&url)
            .into_iter()
            .map(Segment::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let open_ended = url.ends_with('*');
        Ok(Self {
            url,
            segments,
            open_ended,
        })
    }

    /// Normalized configured URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Match request segments, returning bound path arguments on success.
    pub fn matches(&self, input: &[&str]) -> Option<BTreeMap<String, String>> {
        if self.open_ended {
            if self.segments.len() > input.len() {
                return None;
            }
        } else if self.segments.len() != input.len() {
            return None;
        }

        let mut arguments = BTreeMap::new();
        for (segment, value) in self.segments.iter().zip(input) {
            if !segment.matches(value) {
                return None;
            }
            if let Segment::Param(name) = segment {
                arguments.insert(name.clone(), value.to_string());
            }
        }
        Some(arguments)
    }
}
