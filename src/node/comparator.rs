//! Total orderings used during merge, dedup and inheritance walks.

use super::Node;
use std::cmp::Ordering;

/// Order nodes highest-priority-first (`Less` ranks earlier).
///
/// Specificity wins: server-scoped before global, world-scoped before
/// world-free, contextual before context-free, temporary before permanent
/// (sooner expiry first). The tail falls back to the permission string and
/// scoping so that the order is total and reproducible regardless of set
/// iteration order.
pub fn priority_order(a: &Node, b: &Node) -> Ordering {
    b.is_server_specific()
        .cmp(&a.is_server_specific())
        .then_with(|| b.is_world_specific().cmp(&a.is_world_specific()))
        .then_with(|| b.context().len().cmp(&a.context().len()))
        .then_with(|| b.is_temporary().cmp(&a.is_temporary()))
        .then_with(|| match (a.expiry(), b.expiry()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        })
        .then_with(|| a.permission().cmp(b.permission()))
        .then_with(|| {
            (a.server(), a.world(), a.value()).cmp(&(b.server(), b.world(), b.value()))
        })
        .then_with(|| a.context().cmp(b.context()))
}

/// Order `(weight, name)` pairs for the inheritance walk: weight descending,
/// ties broken by name ascending so resolution is deterministic.
pub fn weight_order(a_weight: i64, a_name: &str, b_weight: i64, b_name: &str) -> Ordering {
    b_weight
        .cmp(&a_weight)
        .then_with(|| a_name.cmp(b_name))
}
