//! Inheritance resolution: the recursive walk over the group graph.
//!
//! Resolution starts from a holder's own merged nodes and folds in every
//! applicable parent group, depth-first in weight order. An exclusion set
//! threaded through the recursion guards against cycles, and each level's
//! result is memoized in the holder's keyed cache.

use super::{AllNodesKey, ExportKey, PermissionHolder};
use crate::context::QueryContext;
use crate::holder::MetaView;
use crate::node::comparator;
use crate::node::{shorthand, LocalizedNode, Node, Tristate};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Diagnostic record of one resolution walk.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTrace {
    /// Holders visited, in walk order.
    pub visited: Vec<String>,
    /// Group memberships skipped because the group was already on the
    /// current inheritance path (cycle guard).
    pub skipped_excluded: Vec<String>,
    /// Group memberships pointing at groups not currently loaded.
    pub skipped_unloaded: Vec<String>,
}

impl PermissionHolder {
    /// Fully resolved nodes for this holder: its own merged nodes plus
    /// everything inherited under `ctx`, in priority order and deduplicated.
    ///
    /// `excluded` names groups already on the inheritance path; callers
    /// start with an empty set.
    pub fn get_all_nodes(
        &self,
        excluded: &BTreeSet<String>,
        ctx: &QueryContext,
    ) -> Arc<Vec<LocalizedNode>> {
        let key = AllNodesKey {
            excluded: excluded.iter().map(|g| g.to_lowercase()).collect(),
            ctx: ctx.clone(),
        };
        let excluded = key.excluded.clone();
        self.all_nodes_cache()
            .get_or_compute(key, || Arc::new(self.resolve_all_nodes(excluded, ctx, None)))
    }

    /// Run a resolution walk recording what happened. Bypasses the caches so
    /// the trace reflects the full walk.
    pub fn trace_resolution(
        &self,
        excluded: &BTreeSet<String>,
        ctx: &QueryContext,
    ) -> ResolutionTrace {
        let mut trace = ResolutionTrace::default();
        let excluded = excluded.iter().map(|g| g.to_lowercase()).collect();
        self.resolve_all_nodes(excluded, ctx, Some(&mut trace));
        trace
    }

    fn resolve_all_nodes(
        &self,
        mut excluded: BTreeSet<String>,
        ctx: &QueryContext,
        mut trace: Option<&mut ResolutionTrace>,
    ) -> Vec<LocalizedNode> {
        if self.is_group() {
            excluded.insert(self.name().to_lowercase());
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.visited.push(self.name().to_string());
        }

        let apply_regex = self.engine().config().applying_regex;
        let mut accepted: Vec<LocalizedNode> =
            self.get_permissions(true).iter().cloned().collect();

        // Applicable parent groups, strongest first
        let mut parents: Vec<(i64, String)> = accepted
            .iter()
            .map(LocalizedNode::node)
            .filter(|n| n.value() && n.is_group_node())
            .filter(|n| n.applies_on_server(ctx.server.as_deref(), ctx.apply_global_groups, apply_regex))
            .filter(|n| {
                n.applies_on_world(
                    ctx.world.as_deref(),
                    ctx.apply_global_world_groups,
                    apply_regex,
                )
            })
            .filter(|n| n.applies_with_context(&ctx.context))
            .filter_map(|n| n.group_name())
            .map(str::to_lowercase)
            .filter_map(|name| {
                let group = self.engine().get_loaded_group(&name);
                if group.is_none() {
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.skipped_unloaded.push(name.clone());
                    }
                    tracing::debug!(group = %name, "skipping unloaded parent group");
                }
                group
            })
            .map(|group| (group.get_weight().unwrap_or(0), group.name().to_string()))
            .collect();
        parents.sort_by(|a, b| comparator::weight_order(a.0, &a.1, b.0, &b.1));
        parents.dedup_by(|a, b| a.1 == b.1);
        tracing::trace!(holder = %self.name(), parents = parents.len(), "expanding inheritance");

        for (_, parent) in parents {
            if excluded.contains(&parent) {
                if let Some(trace) = trace.as_deref_mut() {
                    trace.skipped_excluded.push(parent.clone());
                }
                continue;
            }
            let Some(group) = self.engine().get_loaded_group(&parent) else {
                continue;
            };

            let inherited: Vec<LocalizedNode> = match trace.as_deref_mut() {
                None => group.get_all_nodes(&excluded, ctx).iter().cloned().collect(),
                Some(trace) => group.resolve_all_nodes(excluded.clone(), ctx, Some(trace)),
            };
            for candidate in inherited {
                if !accepted.iter().any(|kept| kept.node().almost_equals(candidate.node())) {
                    accepted.push(candidate);
                }
            }
        }

        accepted.sort_by(|a, b| comparator::priority_order(a.node(), b.node()));
        accepted
    }

    /// Resolved nodes narrowed to those applying under `ctx`, deduplicated
    /// by permission string (first in priority order wins).
    ///
    /// Group nodes pass through the server/world/context filters untouched;
    /// they already steered the walk itself.
    pub fn get_all_nodes_filtered(&self, ctx: &QueryContext) -> Arc<Vec<LocalizedNode>> {
        self.filtered_cache().get_or_compute(ctx.clone(), || {
            let apply_regex = self.engine().config().applying_regex;
            let resolved = if ctx.apply_groups {
                self.get_all_nodes(&BTreeSet::new(), ctx)
            } else {
                self.get_permissions(true)
            };

            let mut kept: Vec<LocalizedNode> = Vec::new();
            for entry in resolved.iter() {
                let node = entry.node();
                if !node.is_group_node() {
                    if !node.applies_on_server(ctx.server.as_deref(), ctx.include_global, apply_regex)
                        || !node.applies_on_world(
                            ctx.world.as_deref(),
                            ctx.include_global_world,
                            apply_regex,
                        )
                        || !node.applies_with_context(&ctx.context)
                    {
                        continue;
                    }
                }
                if !kept.iter().any(|k| k.node().permission() == node.permission()) {
                    kept.push(entry.clone());
                }
            }
            Arc::new(kept)
        })
    }

    /// Flatten the filtered view into a permission-string map, expanding
    /// shorthand groups when enabled. First write per string wins.
    pub fn export_nodes(&self, ctx: &QueryContext, lowercase: bool) -> Arc<HashMap<String, bool>> {
        let key = ExportKey {
            ctx: ctx.clone(),
            lowercase,
        };
        self.export_cache().get_or_compute(key, || {
            let expand_shorthand = self.engine().config().applying_shorthand;
            let mut exported: HashMap<String, bool> = HashMap::new();

            for entry in self.get_all_nodes_filtered(ctx).iter() {
                let node = entry.node();
                let permission = if lowercase {
                    node.permission().to_lowercase()
                } else {
                    node.permission().to_string()
                };
                exported.entry(permission).or_insert_with(|| node.value());

                if expand_shorthand {
                    for expanded in shorthand::expand(node.permission()) {
                        let expanded = if lowercase {
                            expanded.to_lowercase()
                        } else {
                            expanded
                        };
                        exported.entry(expanded).or_insert_with(|| node.value());
                    }
                }
            }
            Arc::new(exported)
        })
    }

    /// Fold meta, prefix, suffix and weight nodes across the inheritance
    /// walk into a [`MetaView`]. Earlier (higher-priority) values win.
    pub fn accumulate_meta(&self, excluded: &BTreeSet<String>, ctx: &QueryContext) -> MetaView {
        let mut view = MetaView::new();
        let mut excluded: BTreeSet<String> =
            excluded.iter().map(|g| g.to_lowercase()).collect();
        self.accumulate_meta_into(&mut view, &mut excluded, ctx);
        view
    }

    pub(crate) fn accumulate_meta_into(
        &self,
        view: &mut MetaView,
        excluded: &mut BTreeSet<String>,
        ctx: &QueryContext,
    ) {
        if self.is_group() {
            excluded.insert(self.name().to_lowercase());
        }
        let apply_regex = self.engine().config().applying_regex;
        let own = self.get_permissions(true);

        // Meta checks ignore regex-mode scoping: a literal match only
        for entry in own.iter() {
            let node = entry.node();
            if !node.value() || !(node.is_meta() || node.is_prefix() || node.is_suffix()) {
                continue;
            }
            if node.applies_on_server(ctx.server.as_deref(), ctx.include_global, false)
                && node.applies_on_world(ctx.world.as_deref(), ctx.include_global_world, false)
                && node.applies_with_context(&ctx.context)
            {
                view.accumulate_node(node);
            }
        }

        if let Some(weight) = self.get_weight() {
            view.accumulate_weight(weight);
        }

        let mut parents: Vec<(i64, String)> = own
            .iter()
            .map(LocalizedNode::node)
            .filter(|n| n.value() && n.is_group_node())
            .filter(|n| n.applies_on_server(ctx.server.as_deref(), ctx.apply_global_groups, apply_regex))
            .filter(|n| {
                n.applies_on_world(
                    ctx.world.as_deref(),
                    ctx.apply_global_world_groups,
                    apply_regex,
                )
            })
            .filter(|n| n.applies_with_context(&ctx.context))
            .filter_map(|n| n.group_name())
            .map(str::to_lowercase)
            .filter_map(|name| self.engine().get_loaded_group(&name))
            .map(|group| (group.get_weight().unwrap_or(0), group.name().to_string()))
            .collect();
        parents.sort_by(|a, b| comparator::weight_order(a.0, &a.1, b.0, &b.1));
        parents.dedup_by(|a, b| a.1 == b.1);

        for (_, parent) in parents {
            if excluded.contains(&parent) {
                continue;
            }
            if let Some(group) = self.engine().get_loaded_group(&parent) {
                group.accumulate_meta_into(view, excluded, ctx);
            }
        }
    }

    /// Find the resolved node almost-equal to `node`, together with where it
    /// was inherited from.
    pub fn inherits_permission_info(&self, node: &Node) -> Option<LocalizedNode> {
        self.get_all_nodes(&BTreeSet::new(), &QueryContext::allow_all())
            .iter()
            .find(|entry| entry.node().almost_equals(node))
            .cloned()
    }

    /// Tristate lookup across the full inheritance graph.
    pub fn inherits_permission(&self, node: &Node) -> Tristate {
        self.inherits_permission_info(node)
            .map(|entry| entry.node().tristate())
            .unwrap_or(Tristate::Undefined)
    }
}
