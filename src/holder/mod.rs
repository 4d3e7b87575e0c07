//! Permission holders: users and groups owning node sets.
//!
//! A holder keeps two raw node sets under independent locks — *enduring*
//! (persisted by the embedding application) and *transient* (session-only) —
//! plus a tier of derived-view caches. Local caches (snapshots and the two
//! merged views) depend only on this holder's state; the keyed inheritance
//! caches depend on ancestors and are kept consistent through the
//! [`StateCoordinator`](crate::coordinator::StateCoordinator) cascade, which
//! completes before any mutating call returns.

mod cache;
mod meta;
mod resolve;

pub use meta::MetaView;
pub use resolve::ResolutionTrace;

use crate::engine::PermissionEngine;
use crate::error::{NodeOpError, NodeOpResult};
use crate::events::{self, NodeEvent, NodeEventKind};
use crate::node::comparator;
use crate::node::{LocalizedNode, Node, Tristate};
use cache::{CacheCell, KeyedCache};
use im::HashSet as ImHashSet;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::QueryContext;

/// What kind of entity a holder is. Users are never inheritable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    User,
    Group,
}

impl fmt::Display for HolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Lightweight holder identity used as a graph key, decoupled from the live
/// object. Names are case-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    kind: HolderKind,
    name: String,
}

impl Reference {
    pub fn new(kind: HolderKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_lowercase(),
        }
    }

    pub fn user(name: &str) -> Self {
        Self::new(HolderKind::User, name)
    }

    pub fn group(name: &str) -> Self {
        Self::new(HolderKind::Group, name)
    }

    pub fn kind(&self) -> HolderKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// How to merge a temporary node into an existing almost-equal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporaryModifier {
    /// Refuse: behave exactly like a plain set.
    #[default]
    Deny,
    /// Keep whichever grant expires later.
    Replace,
    /// Add the new duration onto the existing expiry.
    Accumulate,
}

/// Cache key for the full inheritance expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AllNodesKey {
    pub excluded: BTreeSet<String>,
    pub ctx: QueryContext,
}

/// Cache key for the exported string map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ExportKey {
    pub ctx: QueryContext,
    pub lowercase: bool,
}

/// An entity that can hold permissions: a user or a group.
pub struct PermissionHolder {
    kind: HolderKind,
    name: String,
    engine: Arc<PermissionEngine>,

    /// Persisted nodes. Guarded independently of `transient` so readers of
    /// one set never block on mutation of the other.
    enduring: Mutex<HashSet<Node>>,
    /// Session-only nodes, never persisted.
    transient: Mutex<HashSet<Node>>,

    // Local caches: depend only on this holder's own state.
    enduring_cache: CacheCell<ImHashSet<Node>>,
    transient_cache: CacheCell<ImHashSet<Node>>,
    strict_cache: CacheCell<Arc<Vec<LocalizedNode>>>,
    merged_cache: CacheCell<Arc<Vec<LocalizedNode>>>,

    // Keyed caches: depend on ancestor state; invalidated by the
    // coordinator cascade and evicted on idle by the engine.
    all_nodes_cache: KeyedCache<AllNodesKey, Arc<Vec<LocalizedNode>>>,
    filtered_cache: KeyedCache<QueryContext, Arc<Vec<LocalizedNode>>>,
    export_cache: KeyedCache<ExportKey, Arc<HashMap<String, bool>>>,
}

impl PermissionHolder {
    pub(crate) fn new(kind: HolderKind, name: String, engine: Arc<PermissionEngine>) -> Self {
        Self {
            kind,
            name,
            engine,
            enduring: Mutex::new(HashSet::new()),
            transient: Mutex::new(HashSet::new()),
            enduring_cache: CacheCell::new(),
            transient_cache: CacheCell::new(),
            strict_cache: CacheCell::new(),
            merged_cache: CacheCell::new(),
            all_nodes_cache: KeyedCache::new(),
            filtered_cache: KeyedCache::new(),
            export_cache: KeyedCache::new(),
        }
    }

    pub fn kind(&self) -> HolderKind {
        self.kind
    }

    /// The user UUID string or group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_group(&self) -> bool {
        self.kind == HolderKind::Group
    }

    pub fn is_user(&self) -> bool {
        self.kind == HolderKind::User
    }

    pub fn reference(&self) -> Reference {
        Reference::new(self.kind, &self.name)
    }

    pub(crate) fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Snapshots and merged views
    // ------------------------------------------------------------------

    /// Immutable snapshot of the enduring nodes.
    pub fn get_nodes(&self) -> ImHashSet<Node> {
        self.enduring_cache
            .get_or_compute(|| self.enduring.lock().iter().cloned().collect())
    }

    /// Immutable snapshot of the transient nodes.
    pub fn get_transient_nodes(&self) -> ImHashSet<Node> {
        self.transient_cache
            .get_or_compute(|| self.transient.lock().iter().cloned().collect())
    }

    /// Combined enduring+transient nodes in priority order, deduplicated.
    ///
    /// With `merge_temp`, a temporary node collapses into an almost-equal
    /// permanent one (only the highest-priority survivor is kept); without
    /// it, temporary and permanent variants coexist.
    pub fn get_permissions(&self, merge_temp: bool) -> Arc<Vec<LocalizedNode>> {
        let cell = if merge_temp {
            &self.merged_cache
        } else {
            &self.strict_cache
        };
        cell.get_or_compute(|| Arc::new(self.merge_permissions(merge_temp)))
    }

    fn merge_permissions(&self, merge_temp: bool) -> Vec<LocalizedNode> {
        let enduring = self.get_nodes();
        let transient = self.get_transient_nodes();

        let mut combined: Vec<LocalizedNode> = enduring
            .iter()
            .chain(transient.iter())
            .cloned()
            .map(|node| node.localized(&self.name))
            .collect();
        combined.sort_by(|a, b| comparator::priority_order(a.node(), b.node()));

        let mut accepted: Vec<LocalizedNode> = Vec::with_capacity(combined.len());
        'candidates: for candidate in combined {
            for kept in &accepted {
                let duplicate = if merge_temp {
                    candidate.node().equals_ignoring_value_or_temp(kept.node())
                } else {
                    candidate.node().almost_equals(kept.node())
                };
                if duplicate {
                    continue 'candidates;
                }
            }
            accepted.push(candidate);
        }
        accepted
    }

    /// Snapshot of the merged (temp-merged) node set, for event payloads.
    fn merged_snapshot(&self) -> ImHashSet<Node> {
        self.get_permissions(true)
            .iter()
            .map(|ln| ln.node().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Invalidation plumbing
    // ------------------------------------------------------------------

    /// Invalidate local caches and cascade to every holder whose cached
    /// resolution could have consumed this one, both before and after the
    /// edge change. Completes before the mutating call returns.
    fn invalidate(&self, enduring: bool) {
        if enduring {
            self.enduring_cache.invalidate();
        } else {
            self.transient_cache.invalidate();
        }
        self.strict_cache.invalidate();
        self.merged_cache.invalidate();
        self.invalidate_inheritance_caches();

        let coordinator = self.engine.coordinator();
        let reference = self.reference();

        let mut affected = coordinator.dependents_of(&reference);
        self.declare_state();
        affected.extend(coordinator.dependents_of(&reference));

        for dependent in affected {
            if dependent == reference {
                continue;
            }
            if let Some(holder) = self.engine.get_loaded(&dependent) {
                holder.invalidate_inheritance_caches();
            }
        }
    }

    /// Drop the keyed inheritance caches only. Used by the coordinator
    /// cascade and by config swaps.
    pub(crate) fn invalidate_inheritance_caches(&self) {
        self.all_nodes_cache.invalidate_all();
        self.filtered_cache.invalidate_all();
        self.export_cache.invalidate_all();
    }

    /// Re-declare this holder's forward inheritance edges.
    pub(crate) fn declare_state(&self) {
        self.engine
            .coordinator()
            .declare(&self.reference(), self.group_references());
    }

    /// References of every group this holder declares inheritance from,
    /// across both node sets (a transient membership is still a dependency).
    pub fn group_references(&self) -> HashSet<Reference> {
        let enduring = self.get_nodes();
        let transient = self.get_transient_nodes();
        enduring
            .iter()
            .chain(transient.iter())
            .filter_map(|node| node.group_name())
            .map(Reference::group)
            .collect()
    }

    /// Evict idle keyed cache entries. Returns how many were removed.
    pub(crate) fn prune_idle_caches(&self, max_idle: Duration) -> usize {
        self.all_nodes_cache.prune_idle(max_idle)
            + self.filtered_cache.prune_idle(max_idle)
            + self.export_cache.prune_idle(max_idle)
    }

    fn all_nodes_cache(&self) -> &KeyedCache<AllNodesKey, Arc<Vec<LocalizedNode>>> {
        &self.all_nodes_cache
    }

    fn filtered_cache(&self) -> &KeyedCache<QueryContext, Arc<Vec<LocalizedNode>>> {
        &self.filtered_cache
    }

    fn export_cache(&self) -> &KeyedCache<ExportKey, Arc<HashMap<String, bool>>> {
        &self.export_cache
    }

    fn emit(&self, kind: NodeEventKind, before: ImHashSet<Node>, after: ImHashSet<Node>) {
        events::dispatch(
            self.engine.event_sink(),
            NodeEvent {
                holder: self.reference(),
                kind,
                before,
                after,
            },
        );
    }

    // ------------------------------------------------------------------
    // Direct queries
    // ------------------------------------------------------------------

    /// Find a node almost-equal to `node` in the requested set.
    pub fn get_almost_equals(&self, node: &Node, transient: bool) -> Option<Node> {
        let snapshot = if transient {
            self.get_transient_nodes()
        } else {
            self.get_nodes()
        };
        snapshot.iter().find(|n| n.almost_equals(node)).cloned()
    }

    /// Whether the holder directly has a node, as a tristate.
    pub fn has_permission(&self, node: &Node, check_transient: bool) -> Tristate {
        self.get_almost_equals(node, check_transient)
            .map(|n| n.tristate())
            .unwrap_or(Tristate::Undefined)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add an enduring node. Fails with [`NodeOpError::AlreadyHas`] when an
    /// almost-equal node already exists.
    pub fn set_permission(&self, node: Node) -> NodeOpResult {
        if self.has_permission(&node, false) != Tristate::Undefined {
            return Err(NodeOpError::AlreadyHas);
        }

        let before = self.get_nodes();
        {
            self.enduring.lock().insert(node.clone());
        }
        self.invalidate(true);
        let after = self.get_nodes();

        self.emit(NodeEventKind::Added(node), before, after);
        Ok(())
    }

    /// [`set_permission`](Self::set_permission) that silently no-ops when
    /// the node is already present.
    pub fn set_permission_unchecked(&self, node: Node) {
        let _ = self.set_permission(node);
    }

    /// Add a temporary node, merging into an existing almost-equal grant
    /// according to `modifier`. Returns the node that was actually stored.
    pub fn set_permission_with(
        &self,
        node: Node,
        modifier: TemporaryModifier,
    ) -> NodeOpResult<Node> {
        if node.is_temporary() && modifier != TemporaryModifier::Deny {
            if let Some(previous) = self.get_almost_equals(&node, false) {
                let replacement = match modifier {
                    TemporaryModifier::Accumulate => Some(node.with_expiry(
                        previous.expiry().map(|at| at + node.seconds_til_expiry()),
                    )),
                    TemporaryModifier::Replace
                        if node.expiry() > previous.expiry() =>
                    {
                        Some(node.clone())
                    }
                    _ => None,
                };

                if let Some(replacement) = replacement {
                    let before = self.get_nodes();
                    {
                        let mut nodes = self.enduring.lock();
                        nodes.remove(&previous);
                        nodes.insert(replacement.clone());
                    }
                    self.invalidate(true);
                    let after = self.get_nodes();
                    self.emit(NodeEventKind::Added(replacement.clone()), before, after);
                    return Ok(replacement);
                }
            }
        }

        self.set_permission(node.clone())?;
        Ok(node)
    }

    pub fn set_permission_with_unchecked(&self, node: Node, modifier: TemporaryModifier) {
        let _ = self.set_permission_with(node, modifier);
    }

    /// Add a transient (session-only) node.
    pub fn set_transient_permission(&self, node: Node) -> NodeOpResult {
        if self.has_permission(&node, true) != Tristate::Undefined {
            return Err(NodeOpError::AlreadyHas);
        }

        let before = self.get_transient_nodes();
        {
            self.transient.lock().insert(node.clone());
        }
        self.invalidate(false);
        let after = self.get_transient_nodes();

        self.emit(NodeEventKind::Added(node), before, after);
        Ok(())
    }

    pub fn set_transient_permission_unchecked(&self, node: Node) {
        let _ = self.set_transient_permission(node);
    }

    /// Remove the enduring node almost-equal to `node`. Fails with
    /// [`NodeOpError::Lacks`] when no such node exists.
    pub fn unset_permission(&self, node: &Node) -> NodeOpResult {
        if self.has_permission(node, false) == Tristate::Undefined {
            return Err(NodeOpError::Lacks);
        }

        let before = self.get_nodes();
        {
            self.enduring.lock().retain(|n| !n.almost_equals(node));
        }
        self.invalidate(true);
        let after = self.get_nodes();

        self.emit(NodeEventKind::Removed(node.clone()), before, after);
        Ok(())
    }

    pub fn unset_permission_unchecked(&self, node: &Node) {
        let _ = self.unset_permission(node);
    }

    /// Remove by full equality (value and expiry included).
    pub fn unset_permission_exact(&self, node: &Node) -> NodeOpResult {
        let before = self.get_nodes();
        let removed = { self.enduring.lock().remove(node) };
        if !removed {
            return Err(NodeOpError::Lacks);
        }
        self.invalidate(true);
        let after = self.get_nodes();

        self.emit(NodeEventKind::Removed(node.clone()), before, after);
        Ok(())
    }

    /// Remove the transient node almost-equal to `node`.
    pub fn unset_transient_permission(&self, node: &Node) -> NodeOpResult {
        if self.has_permission(node, true) == Tristate::Undefined {
            return Err(NodeOpError::Lacks);
        }

        let before = self.get_transient_nodes();
        {
            self.transient.lock().retain(|n| !n.almost_equals(node));
        }
        self.invalidate(false);
        let after = self.get_transient_nodes();

        self.emit(NodeEventKind::Removed(node.clone()), before, after);
        Ok(())
    }

    pub fn unset_transient_permission_unchecked(&self, node: &Node) {
        let _ = self.unset_transient_permission(node);
    }

    /// Replace the whole enduring set. No event is emitted; this is the
    /// bulk-load path used when the embedding application hydrates a holder.
    pub fn set_nodes(&self, set: HashSet<Node>) {
        {
            let mut nodes = self.enduring.lock();
            if *nodes == set {
                return;
            }
            *nodes = set;
        }
        self.invalidate(true);
    }

    /// Replace the whole transient set.
    pub fn set_transient_nodes(&self, set: HashSet<Node>) {
        {
            let mut nodes = self.transient.lock();
            if *nodes == set {
                return;
            }
            *nodes = set;
        }
        self.invalidate(false);
    }

    /// Remove every enduring node matching `predicate`. Returns whether
    /// anything was removed.
    pub fn remove_if(&self, predicate: impl Fn(&Node) -> bool) -> bool {
        let before = self.get_nodes();
        let removed = {
            let mut nodes = self.enduring.lock();
            let len = nodes.len();
            nodes.retain(|n| !predicate(n));
            nodes.len() != len
        };
        if !removed {
            return false;
        }
        self.invalidate(true);
        let after = self.get_nodes();

        self.emit(NodeEventKind::Cleared, before, after);
        true
    }

    /// Remove every transient node matching `predicate`.
    pub fn remove_if_transient(&self, predicate: impl Fn(&Node) -> bool) -> bool {
        let removed = {
            let mut nodes = self.transient.lock();
            let len = nodes.len();
            nodes.retain(|n| !predicate(n));
            nodes.len() != len
        };
        if removed {
            self.invalidate(false);
        }
        removed
    }

    /// Remove all enduring nodes.
    pub fn clear_nodes(&self) {
        let before = self.get_nodes();
        {
            self.enduring.lock().clear();
        }
        self.invalidate(true);
        let after = self.get_nodes();
        self.emit(NodeEventKind::Cleared, before, after);
    }

    /// Remove enduring nodes scoped to `server` (`None` matches unscoped
    /// nodes).
    pub fn clear_nodes_on_server(&self, server: Option<&str>) -> bool {
        let target = server.unwrap_or("global");
        self.remove_if(|n| node_server_matches(n, target))
    }

    pub fn clear_nodes_on_server_world(&self, server: Option<&str>, world: Option<&str>) -> bool {
        let server = server.unwrap_or("global");
        let world = world.unwrap_or("null");
        self.remove_if(|n| node_server_matches(n, server) && node_world_matches(n, world))
    }

    /// Remove all group memberships.
    pub fn clear_parents(&self) -> bool {
        self.remove_if(Node::is_group_node)
    }

    pub fn clear_parents_on_server(&self, server: Option<&str>) -> bool {
        let target = server.unwrap_or("global");
        self.remove_if(|n| n.is_group_node() && node_server_matches(n, target))
    }

    pub fn clear_parents_on_server_world(
        &self,
        server: Option<&str>,
        world: Option<&str>,
    ) -> bool {
        let server = server.unwrap_or("global");
        let world = world.unwrap_or("null");
        self.remove_if(|n| {
            n.is_group_node() && node_server_matches(n, server) && node_world_matches(n, world)
        })
    }

    /// Remove all meta, prefix and suffix nodes.
    pub fn clear_meta(&self) -> bool {
        self.remove_if(|n| n.is_meta() || n.is_prefix() || n.is_suffix())
    }

    pub fn clear_meta_on_server(&self, server: Option<&str>) -> bool {
        let target = server.unwrap_or("global");
        self.remove_if(|n| {
            (n.is_meta() || n.is_prefix() || n.is_suffix()) && node_server_matches(n, target)
        })
    }

    pub fn clear_meta_on_server_world(&self, server: Option<&str>, world: Option<&str>) -> bool {
        let server = server.unwrap_or("global");
        let world = world.unwrap_or("null");
        self.remove_if(|n| {
            (n.is_meta() || n.is_prefix() || n.is_suffix())
                && node_server_matches(n, server)
                && node_world_matches(n, world)
        })
    }

    /// Remove meta nodes for one key under the given scoping.
    pub fn clear_meta_keys(
        &self,
        key: &str,
        server: Option<&str>,
        world: Option<&str>,
        temporary: bool,
    ) -> bool {
        let server = server.unwrap_or("global");
        let world = world.unwrap_or("null");
        self.remove_if(|n| {
            n.is_temporary() == temporary
                && n.meta_entry()
                    .is_some_and(|(k, _)| k.eq_ignore_ascii_case(key))
                && node_server_matches(n, server)
                && node_world_matches(n, world)
        })
    }

    /// Remove all transient nodes.
    pub fn clear_transient_nodes(&self) {
        let before = self.get_transient_nodes();
        {
            self.transient.lock().clear();
        }
        self.invalidate(false);
        let after = self.get_transient_nodes();
        self.emit(NodeEventKind::Cleared, before, after);
    }

    /// Purge expired temporary nodes from both sets. Returns whether any
    /// were removed.
    pub fn audit_temporary_permissions(&self) -> bool {
        let before = self.merged_snapshot();
        let mut removed: Vec<Node> = Vec::new();

        {
            let mut nodes = self.enduring.lock();
            nodes.retain(|n| {
                if n.has_expired() {
                    removed.push(n.clone());
                    false
                } else {
                    true
                }
            });
        }
        let enduring_removed = removed.len();
        if enduring_removed > 0 {
            self.invalidate(true);
        }

        {
            let mut nodes = self.transient.lock();
            nodes.retain(|n| {
                if n.has_expired() {
                    removed.push(n.clone());
                    false
                } else {
                    true
                }
            });
        }
        if removed.len() > enduring_removed {
            self.invalidate(false);
        }

        if removed.is_empty() {
            return false;
        }

        let after = self.merged_snapshot();
        for node in removed {
            self.emit(NodeEventKind::Removed(node), before.clone(), after.clone());
        }
        true
    }

    // ------------------------------------------------------------------
    // Derived node views
    // ------------------------------------------------------------------

    pub fn get_temporary_nodes(&self) -> Vec<Node> {
        self.filtered_permission_nodes(Node::is_temporary)
    }

    pub fn get_permanent_nodes(&self) -> Vec<Node> {
        self.filtered_permission_nodes(Node::is_permanent)
    }

    pub fn get_prefix_nodes(&self) -> Vec<Node> {
        self.filtered_permission_nodes(Node::is_prefix)
    }

    pub fn get_suffix_nodes(&self) -> Vec<Node> {
        self.filtered_permission_nodes(Node::is_suffix)
    }

    pub fn get_meta_nodes(&self) -> Vec<Node> {
        self.filtered_permission_nodes(Node::is_meta)
    }

    fn filtered_permission_nodes(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Node> {
        self.get_permissions(false)
            .iter()
            .map(|ln| ln.node())
            .filter(|n| predicate(n))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Groups and weight
    // ------------------------------------------------------------------

    /// Names of every group this holder directly inherits, on all servers.
    pub fn get_group_names(&self) -> Vec<String> {
        self.get_nodes()
            .iter()
            .filter_map(|n| n.group_name())
            .map(str::to_string)
            .collect()
    }

    /// Names of the groups inherited under a specific server/world scoping.
    pub fn get_local_groups(
        &self,
        server: Option<&str>,
        world: Option<&str>,
        include_global: bool,
    ) -> Vec<String> {
        self.get_nodes()
            .iter()
            .filter(|n| n.is_group_node())
            .filter(|n| n.applies_on_server(server, include_global, true))
            .filter(|n| n.applies_on_world(world, include_global, true))
            .filter_map(|n| n.group_name())
            .map(str::to_string)
            .collect()
    }

    /// This group's inheritance weight: the highest parseable `weight.<n>`
    /// node, falling back to the configured per-group mapping. Users have no
    /// weight. Malformed declarations are skipped, not errors.
    pub fn get_weight(&self) -> Option<i64> {
        if self.is_user() {
            return None;
        }

        let mut weight: Option<i64> = None;
        for node in self.get_nodes().iter() {
            if !node.is_weight_node() {
                continue;
            }
            match node.weight_entry() {
                Some(w) => weight = Some(weight.map_or(w, |current| current.max(w))),
                None => tracing::warn!(
                    holder = %self.name,
                    node = %node.permission(),
                    "ignoring malformed weight node"
                ),
            }
        }

        weight.or_else(|| self.engine.config().group_weight(&self.name))
    }

    /// Whether this holder directly inherits `group` (or is that group).
    pub fn inherits_group(&self, group: &str) -> bool {
        group.eq_ignore_ascii_case(&self.name)
            || self.has_permission(&Node::group(group), false) == Tristate::True
    }

    pub fn set_inherit_group(&self, group: &str) -> NodeOpResult {
        if group.eq_ignore_ascii_case(&self.name) {
            return Err(NodeOpError::AlreadyHas);
        }
        self.set_permission(Node::group(group))
    }

    pub fn unset_inherit_group(&self, group: &str) -> NodeOpResult {
        self.unset_permission(&Node::group(group))
    }
}

fn node_server_matches(node: &Node, target: &str) -> bool {
    node.server().unwrap_or("global").eq_ignore_ascii_case(target)
}

fn node_world_matches(node: &Node, target: &str) -> bool {
    node.world().unwrap_or("null").eq_ignore_ascii_case(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PermissionEngine;

    fn group(name: &str) -> Arc<PermissionHolder> {
        PermissionEngine::new().create_group(name)
    }

    #[test]
    fn test_set_permission_already_has() {
        let holder = group("admin");
        holder.set_permission(Node::build("fly").build()).unwrap();

        // Differs only in value: still almost-equal
        let denied = Node::build("fly").negated().build();
        assert_eq!(holder.set_permission(denied.clone()), Err(NodeOpError::AlreadyHas));

        // The unchecked variant leaves the first node in place
        holder.set_permission_unchecked(denied);
        assert_eq!(holder.has_permission(&Node::build("fly").build(), false), Tristate::True);
    }

    #[test]
    fn test_unset_permission_lacks() {
        let holder = group("admin");
        let node = Node::build("fly").build();
        assert_eq!(holder.unset_permission(&node), Err(NodeOpError::Lacks));

        holder.set_permission(node.clone()).unwrap();
        assert!(holder.unset_permission(&node).is_ok());
        assert_eq!(holder.has_permission(&node, false), Tristate::Undefined);
    }

    #[test]
    fn test_unset_exact_requires_full_equality() {
        let holder = group("admin");
        holder.set_permission(Node::build("fly").build()).unwrap();

        let negated = Node::build("fly").negated().build();
        assert_eq!(holder.unset_permission_exact(&negated), Err(NodeOpError::Lacks));
        assert!(holder.unset_permission_exact(&Node::build("fly").build()).is_ok());
    }

    #[test]
    fn test_transient_and_enduring_are_independent() {
        let holder = group("admin");
        let node = Node::build("fly").build();
        holder.set_transient_permission(node.clone()).unwrap();

        assert_eq!(holder.has_permission(&node, true), Tristate::True);
        assert_eq!(holder.has_permission(&node, false), Tristate::Undefined);

        // The same node can exist in both sets; the merged view trims it
        holder.set_permission(node.clone()).unwrap();
        let merged = holder.get_permissions(false);
        assert_eq!(
            merged.iter().filter(|ln| ln.node().permission() == "fly").count(),
            1
        );

        holder.clear_transient_nodes();
        assert_eq!(holder.has_permission(&node, true), Tristate::Undefined);
        assert_eq!(holder.has_permission(&node, false), Tristate::True);
    }

    #[test]
    fn test_no_almost_equal_pairs_in_merged_views() {
        let holder = group("admin");
        holder.set_permission(Node::build("fly").build()).unwrap();
        holder
            .set_permission(Node::build("fly").expires_in(3600).build())
            .unwrap();
        holder
            .set_transient_permission(Node::build("fly").build())
            .unwrap();

        // Strict view: temporary and permanent variants coexist, but no two
        // entries are almost-equal
        let strict = holder.get_permissions(false);
        for (i, a) in strict.iter().enumerate() {
            for b in strict.iter().skip(i + 1) {
                assert!(!a.node().almost_equals(b.node()));
            }
        }
        assert_eq!(strict.len(), 2);

        // Temp-merged view: a single survivor
        let merged = holder.get_permissions(true);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_audit_is_idempotent() {
        let holder = group("admin");
        holder
            .set_permission(Node::build("fly").expiry(1).build())
            .unwrap();
        holder.set_permission(Node::build("chat.color").build()).unwrap();

        assert!(holder.audit_temporary_permissions());
        assert!(!holder.audit_temporary_permissions());
        assert_eq!(holder.get_nodes().len(), 1);
    }

    #[test]
    fn test_temporary_modifier_replace() {
        let holder = group("admin");
        holder
            .set_permission(Node::build("fly").expires_in(100).build())
            .unwrap();

        // A shorter grant does not replace the longer one
        let shorter = Node::build("fly").expires_in(10).build();
        let stored = holder
            .set_permission_with(shorter, TemporaryModifier::Replace)
            .unwrap_err();
        assert_eq!(stored, NodeOpError::AlreadyHas);

        let longer = Node::build("fly").expires_in(10_000).build();
        let stored = holder
            .set_permission_with(longer.clone(), TemporaryModifier::Replace)
            .unwrap();
        assert_eq!(stored.expiry(), longer.expiry());
    }

    #[test]
    fn test_temporary_modifier_accumulate() {
        let holder = group("admin");
        holder
            .set_permission(Node::build("fly").expires_in(100).build())
            .unwrap();
        let previous_expiry = holder
            .get_almost_equals(&Node::build("fly").expires_in(100).build(), false)
            .unwrap()
            .expiry()
            .unwrap();

        let stored = holder
            .set_permission_with(
                Node::build("fly").expires_in(50).build(),
                TemporaryModifier::Accumulate,
            )
            .unwrap();
        let accumulated = stored.expiry().unwrap();
        assert!(accumulated >= previous_expiry + 49 && accumulated <= previous_expiry + 51);
        assert_eq!(holder.get_nodes().len(), 1);
    }

    #[test]
    fn test_clear_scoped_nodes() {
        let holder = group("admin");
        holder.set_permission(Node::build("fly").server("lobby").build()).unwrap();
        holder.set_permission(Node::build("fly").build()).unwrap();

        assert!(holder.clear_nodes_on_server(Some("lobby")));
        let remaining = holder.get_nodes();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|n| n.server().is_none()));

        // Clearing the global scope removes the unscoped node
        assert!(holder.clear_nodes_on_server(None));
        assert!(holder.get_nodes().is_empty());
    }

    #[test]
    fn test_clear_parents_and_meta() {
        let holder = group("admin");
        holder.set_permission(Node::group("mod")).unwrap();
        holder.set_permission(Node::build("prefix.10.[A]").build()).unwrap();
        holder.set_permission(Node::build("meta.rank.captain").build()).unwrap();
        holder.set_permission(Node::build("fly").build()).unwrap();

        assert!(holder.clear_parents());
        assert!(holder.get_group_names().is_empty());

        assert!(holder.clear_meta());
        assert_eq!(holder.get_nodes().len(), 1);
    }

    #[test]
    fn test_clear_meta_keys() {
        let holder = group("admin");
        holder.set_permission(Node::build("meta.rank.captain").build()).unwrap();
        holder.set_permission(Node::build("meta.tier.gold").build()).unwrap();

        assert!(holder.clear_meta_keys("rank", None, None, false));
        assert_eq!(holder.get_meta_nodes().len(), 1);
        assert!(!holder.clear_meta_keys("rank", None, None, false));
    }

    #[test]
    fn test_weight_from_nodes_and_config() {
        let engine = PermissionEngine::new();
        let holder = engine.create_group("admin");
        assert_eq!(holder.get_weight(), None);

        holder.set_permission(Node::build("weight.10").build()).unwrap();
        holder.set_permission(Node::build("weight.50").build()).unwrap();
        // Malformed declarations are skipped
        holder.set_permission(Node::build("weight.heavy").build()).unwrap();
        assert_eq!(holder.get_weight(), Some(50));

        let mut config = engine.config();
        config.group_weights.insert("fallback".into(), 7);
        engine.set_config(config);
        let fallback = engine.create_group("fallback");
        assert_eq!(fallback.get_weight(), Some(7));

        let user = engine.create_user(uuid::Uuid::new_v4());
        assert_eq!(user.get_weight(), None);
    }

    #[test]
    fn test_inherit_group_sugar() {
        let holder = group("admin");
        assert_eq!(holder.set_inherit_group("admin"), Err(NodeOpError::AlreadyHas));

        holder.set_inherit_group("Mod").unwrap();
        assert!(holder.inherits_group("mod"));
        assert_eq!(holder.get_group_names(), vec!["mod"]);

        holder.unset_inherit_group("mod").unwrap();
        assert!(!holder.inherits_group("mod"));
    }

    #[test]
    fn test_set_nodes_bulk_replace() {
        let holder = group("admin");
        holder.set_permission(Node::build("old").build()).unwrap();

        let set: HashSet<Node> = [Node::build("new").build()].into_iter().collect();
        holder.set_nodes(set);
        assert_eq!(holder.has_permission(&Node::build("old").build(), false), Tristate::Undefined);
        assert_eq!(holder.has_permission(&Node::build("new").build(), false), Tristate::True);
    }

    #[test]
    fn test_remove_if() {
        let holder = group("admin");
        holder.set_permission(Node::build("a.one").build()).unwrap();
        holder.set_permission(Node::build("b.two").build()).unwrap();

        assert!(holder.remove_if(|n| n.permission().starts_with("a.")));
        assert!(!holder.remove_if(|n| n.permission().starts_with("a.")));
        assert_eq!(holder.get_nodes().len(), 1);
    }
}
