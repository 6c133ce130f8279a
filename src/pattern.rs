//! Pattern matching for site expressions, task names and dataset names.
//!
//! Every user-supplied pattern is matched anchored at the start of the value
//! and unanchored at the end: `SITE_A` matches `SITE_A_DISK`, `DISK` does not.
//! Concrete site names that were already resolved use [`Pattern::exact`],
//! which matches the whole value only.
//! All call sites go through [`Pattern::matches`] / [`PatternSet::matches_any`]
//! so this is the only place that knows the matching semantics.

use std::fmt;

use fancy_regex::Regex;
use tracing::warn;

use crate::types::error::DsRuleError;

#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, DsRuleError> {
        let regex = Regex::new(&format!("^(?:{source})"))
            .map_err(|e| DsRuleError::InvalidRegex(format!("{source}: {e}")))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Pattern matching exactly `name` and nothing longer.
    pub fn exact(name: &str) -> Result<Self, DsRuleError> {
        let regex = Regex::new(&format!("^{}$", fancy_regex::escape(name)))
            .map_err(|e| DsRuleError::InvalidRegex(format!("{name}: {e}")))?;
        Ok(Self {
            source: name.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.regex.is_match(value) {
            Ok(matched) => matched,
            Err(e) => {
                // Backtracking limit exceeded: treated as no match.
                warn!(pattern = self.source, value = value, error = %e, "pattern evaluation failed.");
                false
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.regex.as_str() == other.regex.as_str()
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Ordered collection of patterns. Evaluation order follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Result<Self, DsRuleError> {
        let patterns = sources
            .iter()
            .map(|source| Pattern::new(source.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// One exact pattern per concrete site name.
    pub fn exact<S: AsRef<str>>(names: &[S]) -> Result<Self, DsRuleError> {
        let patterns = names
            .iter()
            .map(|name| Pattern::exact(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True if at least one pattern matches. An empty set matches nothing.
    pub fn matches_any(&self, value: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn sources(&self) -> Vec<&str> {
        self.patterns.iter().map(Pattern::as_str).collect()
    }
}

impl fmt::Display for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sources().join(", "))
    }
}
