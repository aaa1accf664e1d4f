//! Field-code patterns used as handler and ignore-list keys.

use std::collections::BTreeMap;
use std::fmt;

/// An exact field code (`020__a`) or a prefix wildcard (`8564_*`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldPattern {
    Exact(String),
    Prefix(String),
}

impl FieldPattern {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(raw.to_string()),
        }
    }

    #[must_use]
    pub fn matches(&self, code: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == code,
            Self::Prefix(prefix) => code.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for FieldPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(code) => f.write_str(code),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Pattern-keyed lookup table.
///
/// Exact codes beat prefixes; among prefixes the longest match wins.
#[derive(Debug, Clone)]
pub struct PatternTable<T> {
    exact: BTreeMap<String, T>,
    prefixes: BTreeMap<String, T>,
}

impl<T> Default for PatternTable<T> {
    fn default() -> Self {
        Self {
            exact: BTreeMap::new(),
            prefixes: BTreeMap::new(),
        }
    }
}

impl<T> PatternTable<T> {
    /// Insert or replace the entry for `pattern`.
    pub fn insert(&mut self, pattern: FieldPattern, value: T) -> Option<T> {
        match pattern {
            FieldPattern::Exact(code) => self.exact.insert(code, value),
            FieldPattern::Prefix(prefix) => self.prefixes.insert(prefix, value),
        }
    }

    pub fn remove(&mut self, pattern: &FieldPattern) -> Option<T> {
        match pattern {
            FieldPattern::Exact(code) => self.exact.remove(code),
            FieldPattern::Prefix(prefix) => self.prefixes.remove(prefix),
        }
    }

    /// Best entry for a concrete field code.
    #[must_use]
    pub fn lookup(&self, code: &str) -> Option<&T> {
        if let Some(value) = self.exact.get(code) {
            return Some(value);
        }
        self.prefixes
            .iter()
            .filter(|(prefix, _)| code.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.lookup(code).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All patterns, exact codes first.
    pub fn patterns(&self) -> impl Iterator<Item = FieldPattern> + '_ {
        self.exact
            .keys()
            .map(|k| FieldPattern::Exact(k.clone()))
            .chain(self.prefixes.keys().map(|k| FieldPattern::Prefix(k.clone())))
    }
}

impl<T: Clone> PatternTable<T> {
    /// Copy every entry of `other` that is not already present.
    pub fn inherit(&mut self, other: &Self) {
        for (code, value) in &other.exact {
            self.exact.entry(code.clone()).or_insert_with(|| value.clone());
        }
        for (prefix, value) in &other.prefixes {
            self.prefixes
                .entry(prefix.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_prefix() {
        assert_eq!(FieldPattern::parse("020__a"), FieldPattern::Exact("020__a".into()));
        assert_eq!(FieldPattern::parse("8564_*"), FieldPattern::Prefix("8564_".into()));
        assert!(FieldPattern::parse("8564_*").matches("8564_u"));
        assert!(!FieldPattern::parse("8564_*").matches("8567_u"));
        assert_eq!(FieldPattern::parse("99*").to_string(), "99*");
    }

    #[test]
    fn exact_beats_prefix_and_longest_prefix_wins() {
        let mut table = PatternTable::default();
        table.insert(FieldPattern::parse("85*"), "short");
        table.insert(FieldPattern::parse("8564_*"), "long");
        table.insert(FieldPattern::parse("8564_u"), "exact");

        assert_eq!(table.lookup("8564_u"), Some(&"exact"));
        assert_eq!(table.lookup("8564_y"), Some(&"long"));
        assert_eq!(table.lookup("8560_f"), Some(&"short"));
        assert_eq!(table.lookup("245__a"), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn inherit_keeps_own_entries() {
        let mut base = PatternTable::default();
        base.insert(FieldPattern::parse("245__a"), 1);
        base.insert(FieldPattern::parse("99*"), 2);

        let mut own = PatternTable::default();
        own.insert(FieldPattern::parse("245__a"), 10);
        own.inherit(&base);

        assert_eq!(own.lookup("245__a"), Some(&10));
        assert_eq!(own.lookup("999C5"), Some(&2));
    }
}
