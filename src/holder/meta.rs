//! Resolved metadata view.
//!
//! Built by folding meta/prefix/suffix/weight nodes from a holder and its
//! ancestry in priority order: the first value seen per meta key wins, chat
//! meta keeps the first text seen per priority level, and the weight tracks
//! the single highest value across the walk.

use crate::node::Node;
use std::collections::{BTreeMap, HashMap};

/// Accumulated metadata for a holder under one context.
#[derive(Debug, Clone, Default)]
pub struct MetaView {
    meta: HashMap<String, String>,
    prefixes: BTreeMap<i64, String>,
    suffixes: BTreeMap<i64, String>,
    weight: Option<i64>,
}

impl MetaView {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn accumulate_node(&mut self, node: &Node) {
        if let Some((key, value)) = node.meta_entry() {
            self.meta
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        } else if let Some((priority, text)) = node.prefix_entry() {
            self.prefixes
                .entry(priority)
                .or_insert_with(|| text.to_string());
        } else if let Some((priority, text)) = node.suffix_entry() {
            self.suffixes
                .entry(priority)
                .or_insert_with(|| text.to_string());
        }
    }

    pub(crate) fn accumulate_weight(&mut self, weight: i64) {
        self.weight = Some(self.weight.map_or(weight, |current| current.max(weight)));
    }

    /// All resolved meta key/value pairs.
    pub fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// The highest-priority prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefixes.values().next_back().map(String::as_str)
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffixes.values().next_back().map(String::as_str)
    }

    /// All prefixes by priority level.
    pub fn prefixes(&self) -> &BTreeMap<i64, String> {
        &self.prefixes
    }

    pub fn suffixes(&self) -> &BTreeMap<i64, String> {
        &self.suffixes
    }

    /// Highest weight seen across the holder and its ancestry.
    pub fn weight(&self) -> Option<i64> {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_meta_key_wins() {
        let mut view = MetaView::new();
        view.accumulate_node(&Node::build("meta.rank.captain").build());
        view.accumulate_node(&Node::build("meta.rank.deckhand").build());
        assert_eq!(view.get("rank"), Some("captain"));
    }

    #[test]
    fn test_highest_priority_prefix() {
        let mut view = MetaView::new();
        view.accumulate_node(&Node::build("prefix.10.[Member]").build());
        view.accumulate_node(&Node::build("prefix.100.[Admin]").build());
        // First seen per level sticks
        view.accumulate_node(&Node::build("prefix.100.[Impostor]").build());

        assert_eq!(view.prefix(), Some("[Admin]"));
        assert_eq!(view.prefixes().len(), 2);
    }

    #[test]
    fn test_weight_keeps_maximum() {
        let mut view = MetaView::new();
        view.accumulate_weight(10);
        view.accumulate_weight(50);
        view.accumulate_weight(25);
        assert_eq!(view.weight(), Some(50));
    }

    #[test]
    fn test_non_meta_nodes_ignored() {
        let mut view = MetaView::new();
        view.accumulate_node(&Node::build("chat.color").build());
        assert!(view.meta().is_empty());
        assert!(view.prefix().is_none());
    }
}
