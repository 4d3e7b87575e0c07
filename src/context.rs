//! Context sets and query-time context options.
//!
//! A [`ContextSet`] qualifies where a node applies (arbitrary key to
//! set-of-values). A [`QueryContext`] carries the target server/world, the
//! query's own context set, and the toggles deciding whether unscoped nodes
//! and groups apply. Query contexts double as cache-key components, so they
//! are immutable value types with derived `Eq`/`Hash`.

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// A set of contextual qualifiers: key to set-of-values.
///
/// Keys are lowercased on insert. Matching is subset containment: every
/// key/value pair held by a node's context must be present in the query
/// context for the node to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct ContextSet(BTreeMap<String, BTreeSet<String>>);

impl ContextSet {
    /// Create an empty context set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key/value pair. Keys are lowercased; duplicate pairs are no-ops.
    pub fn add(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(key.as_ref().to_lowercase())
            .or_default()
            .insert(value.into());
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of key/value pairs held (values counted individually).
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0
            .get(&key.to_lowercase())
            .is_some_and(|values| values.contains(value))
    }

    /// Whether every pair in `self` is present in `other`.
    pub fn is_satisfied_by(&self, other: &ContextSet) -> bool {
        self.0.iter().all(|(key, values)| {
            other
                .0
                .get(key)
                .is_some_and(|have| values.is_subset(have))
        })
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(key, values)| {
            values.iter().map(move |value| (key.as_str(), value.as_str()))
        })
    }
}

impl FromIterator<(String, String)> for ContextSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (key, value) in iter {
            set.add(key, value);
        }
        set
    }
}

/// Query-time context: the target scoping plus the toggles controlling how
/// unscoped nodes and group memberships apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryContext {
    /// Target server, `None` for a global query.
    pub server: Option<String>,
    /// Target world, `None` for a world-less query.
    pub world: Option<String>,
    /// Arbitrary context pairs the query satisfies.
    pub context: ContextSet,
    /// Whether unscoped (global) permission nodes apply.
    pub include_global: bool,
    /// Whether world-unscoped permission nodes apply.
    pub include_global_world: bool,
    /// Whether group inheritance is expanded at all.
    pub apply_groups: bool,
    /// Whether unscoped group memberships apply.
    pub apply_global_groups: bool,
    /// Whether world-unscoped group memberships apply.
    pub apply_global_world_groups: bool,
}

impl QueryContext {
    /// A context under which every node and every group membership applies.
    pub fn allow_all() -> Self {
        Self {
            server: None,
            world: None,
            context: ContextSet::new(),
            include_global: true,
            include_global_world: true,
            apply_groups: true,
            apply_global_groups: true,
            apply_global_world_groups: true,
        }
    }

    /// An allow-all context targeting a specific server.
    pub fn for_server(server: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            ..Self::allow_all()
        }
    }

    /// An allow-all context targeting a specific server and world.
    pub fn for_server_world(server: impl Into<String>, world: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            world: Some(world.into()),
            ..Self::allow_all()
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::allow_all()
    }
}

lazy_static! {
    // Compiled patterns for regex-mode server/world values. Invalid patterns
    // are cached as None so they are not recompiled on every check.
    static ref PATTERN_CACHE: DashMap<String, Option<Regex>> = DashMap::new();
}

/// Match a node's server/world value against a query target.
///
/// With `apply_regex` enabled, a value carrying the `r=` prefix is treated
/// as an anchored regular expression. Everything else (including invalid
/// patterns) falls back to exact case-insensitive comparison.
pub(crate) fn value_matches(node_value: &str, target: &str, apply_regex: bool) -> bool {
    if apply_regex
        && let Some(raw) = node_value
            .strip_prefix("r=")
            .or_else(|| node_value.strip_prefix("R="))
    {
        let compiled = PATTERN_CACHE
            .entry(raw.to_string())
            .or_insert_with(|| Regex::new(&format!("^(?:{raw})$")).ok())
            .value()
            .clone();
        if let Some(pattern) = compiled {
            return pattern.is_match(target);
        }
    }
    node_value.eq_ignore_ascii_case(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_containment() {
        let node_ctx = ContextSet::new().with("gamemode", "creative");
        let query = ContextSet::new()
            .with("gamemode", "creative")
            .with("dimension", "nether");

        assert!(node_ctx.is_satisfied_by(&query));
        assert!(!query.is_satisfied_by(&node_ctx));
        // Empty context is satisfied by anything
        assert!(ContextSet::new().is_satisfied_by(&node_ctx));
    }

    #[test]
    fn test_keys_lowercased() {
        let ctx = ContextSet::new().with("GameMode", "creative");
        assert!(ctx.contains("gamemode", "creative"));
        assert!(!ctx.contains("gamemode", "survival"));
    }

    #[test]
    fn test_value_matches_literal() {
        assert!(value_matches("Survival", "survival", false));
        assert!(!value_matches("survival", "lobby", false));
        // Regex syntax is inert when the flag is off
        assert!(!value_matches("r=sur.*", "survival", false));
    }

    #[test]
    fn test_value_matches_regex() {
        assert!(value_matches("r=sur.*", "survival", true));
        assert!(value_matches("R=lobby-[0-9]+", "lobby-3", true));
        // Anchored: partial matches do not count
        assert!(!value_matches("r=lobby", "lobby-3", true));
        // Invalid pattern falls back to literal comparison
        assert!(!value_matches("r=(unclosed", "anything", true));
        assert!(value_matches("r=(unclosed", "r=(unclosed", true));
    }

    #[test]
    fn test_query_context_equality_as_key() {
        let a = QueryContext::for_server("lobby");
        let b = QueryContext::for_server("lobby");
        assert_eq!(a, b);
        assert_ne!(a, QueryContext::for_server("survival"));
    }
}
