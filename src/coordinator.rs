//! Cross-holder cache invalidation graph.
//!
//! Tracks, process-wide, which holders currently declare inheritance from
//! which others. Edges are keyed by lightweight [`Reference`]s rather than
//! live objects, so the coordinator never owns a holder. Lookups and edge
//! updates use per-key shard locking via `DashMap`; there is no global lock
//! across holders.

use crate::holder::Reference;
use dashmap::DashMap;
use std::collections::HashSet;

/// Reverse-dependency registry for inheritance edges.
///
/// `declare` is called whenever a holder's node sets change; `dependents_of`
/// answers "whose cached resolution could have consumed this holder" and is
/// transitive over the reverse edges.
#[derive(Default)]
pub struct StateCoordinator {
    /// child -> the parents it currently declares.
    forward: DashMap<Reference, HashSet<Reference>>,
    /// parent -> the children that declared it.
    reverse: DashMap<Reference, HashSet<Reference>>,
}

impl StateCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `child`'s declared parent set, updating reverse edges.
    pub fn declare(&self, child: &Reference, parents: HashSet<Reference>) {
        let previous = self
            .forward
            .insert(child.clone(), parents.clone())
            .unwrap_or_default();

        for stale in previous.difference(&parents) {
            if let Some(mut children) = self.reverse.get_mut(stale) {
                children.remove(child);
            }
        }
        // Insert unconditionally (not just the difference) so a declaration
        // heals reverse edges dropped by an unload of the parent.
        for parent in &parents {
            self.reverse
                .entry(parent.clone())
                .or_default()
                .insert(child.clone());
        }

        tracing::debug!(child = %child, parents = parents.len(), "declared inheritance edges");
    }

    /// Every holder whose resolution could have consumed `holder`, directly
    /// or through further inheritance.
    pub fn dependents_of(&self, holder: &Reference) -> HashSet<Reference> {
        let mut dependents = HashSet::new();
        let mut queue = vec![holder.clone()];

        while let Some(current) = queue.pop() {
            // Snapshot the edge set so no shard lock is held while walking
            let children: Vec<Reference> = match self.reverse.get(&current) {
                Some(set) => set.iter().cloned().collect(),
                None => continue,
            };
            for child in children {
                if dependents.insert(child.clone()) {
                    queue.push(child);
                }
            }
        }

        dependents
    }

    /// The parents `holder` currently declares.
    pub fn parents_of(&self, holder: &Reference) -> HashSet<Reference> {
        self.forward
            .get(holder)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Drop every edge touching `holder`. Called on unload.
    pub fn clear(&self, holder: &Reference) {
        if let Some((_, parents)) = self.forward.remove(holder) {
            for parent in parents {
                if let Some(mut children) = self.reverse.get_mut(&parent) {
                    children.remove(holder);
                }
            }
        }
        self.reverse.remove(holder);
    }

    /// Drop the whole graph. Called on engine shutdown.
    pub fn reset(&self) {
        self.forward.clear();
        self.reverse.clear();
    }
}
