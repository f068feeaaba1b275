//! Element selection for a run.

use std::path::Path;

use regex::Regex;

use crate::error::{KettleError, Result};
use crate::result::elements::{canonical_name, parse_id};

/// One operator-supplied match pattern.
#[derive(Debug, Clone)]
pub enum MatchPattern {
    /// `N-M`, matched against the element id.
    Id(String),
    /// `Suite#method`, matched exactly.
    Element { suite: String, method: String },
    /// `/regex/`, matched against `Suite#method`.
    Regex(Regex),
    /// A bare word equal to either the suite or the method name.
    Name(String),
}

impl MatchPattern {
    pub fn parse(text: &str) -> Result<Self> {
        if is_regex_literal(text) {
            let source = &text[1..text.len() - 1];
            let regex = Regex::new(source).map_err(|e| KettleError::MatchPattern {
                pattern: text.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(MatchPattern::Regex(regex));
        }
        if parse_id(text).is_some() {
            return Ok(MatchPattern::Id(text.to_string()));
        }
        if let Some((suite, method)) = text.split_once('#') {
            if !suite.is_empty() && !method.is_empty() {
                return Ok(MatchPattern::Element {
                    suite: suite.to_string(),
                    method: method.to_string(),
                });
            }
        }
        Ok(MatchPattern::Name(text.to_string()))
    }

    pub fn matches(&self, id: &str, suite: &str, method: &str) -> bool {
        match self {
            MatchPattern::Id(want) => want == id,
            MatchPattern::Element {
                suite: want_suite,
                method: want_method,
            } => want_suite == suite && want_method == method,
            MatchPattern::Regex(regex) => regex.is_match(&canonical_name(suite, method)),
            MatchPattern::Name(name) => name == suite || name == method,
        }
    }
}

/// `/.../` with at least one character between the slashes. An existing
/// directory such as `/home/me/proj/test/` is a path, not a regex.
pub fn is_regex_literal(text: &str) -> bool {
    text.len() > 2 && text.starts_with('/') && text.ends_with('/') && !Path::new(text).is_dir()
}

/// Union of match patterns. An empty filter selects every element.
#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    patterns: Vec<MatchPattern>,
}

impl ElementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| MatchPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Select exactly the given element ids.
    pub fn ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: ids.into_iter().map(MatchPattern::Id).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn selects(&self, id: &str, suite: &str, method: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(id, suite, method))
    }
}
