//! Engine: the shared root owning configuration, the invalidation
//! coordinator, the event sink and the registry of loaded holders.
//!
//! Holders keep a strong reference to the engine; the engine only keeps
//! weak references back, so dropping every external `Arc<PermissionHolder>`
//! unloads the holder naturally.

use crate::config::SettingsConfig;
use crate::coordinator::StateCoordinator;
use crate::events::{EventSink, NoopEventSink};
use crate::holder::{HolderKind, PermissionHolder, Reference};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Shared engine state. Construct through [`PermissionEngine::builder`].
pub struct PermissionEngine {
    config: parking_lot::RwLock<SettingsConfig>,
    coordinator: StateCoordinator,
    events: Box<dyn EventSink>,
    holders: DashMap<Reference, Weak<PermissionHolder>>,
}

/// Builder for [`PermissionEngine`].
pub struct EngineBuilder {
    config: SettingsConfig,
    events: Box<dyn EventSink>,
}

impl EngineBuilder {
    pub fn config(mut self, config: SettingsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn build(self) -> Arc<PermissionEngine> {
        self.config.warn_inconsistent();
        Arc::new(PermissionEngine {
            config: parking_lot::RwLock::new(self.config),
            coordinator: StateCoordinator::new(),
            events: self.events,
            holders: DashMap::new(),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: SettingsConfig::default(),
            events: Box::new(NoopEventSink),
        }
    }
}

impl PermissionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// An engine with default settings and no event sink.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Snapshot of the current settings. A clone, so no lock is held while
    /// the caller inspects it.
    pub fn config(&self) -> SettingsConfig {
        self.config.read().clone()
    }

    /// Swap the settings and drop every cached resolution, since matching
    /// behavior may have changed.
    pub fn set_config(&self, config: SettingsConfig) {
        config.warn_inconsistent();
        *self.config.write() = config;
        for entry in self.holders.iter() {
            if let Some(holder) = entry.value().upgrade() {
                holder.invalidate_inheritance_caches();
            }
        }
    }

    pub(crate) fn coordinator(&self) -> &StateCoordinator {
        &self.coordinator
    }

    pub(crate) fn event_sink(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// Create (or recreate) a holder and register it. The engine holds the
    /// holder weakly; the returned `Arc` is the owning handle.
    pub fn create_holder(
        self: &Arc<Self>,
        kind: HolderKind,
        name: &str,
    ) -> Arc<PermissionHolder> {
        let name = name.to_lowercase();
        let holder = Arc::new(PermissionHolder::new(kind, name, Arc::clone(self)));
        self.holders
            .insert(holder.reference(), Arc::downgrade(&holder));
        holder.declare_state();
        tracing::debug!(holder = %holder.reference(), "holder loaded");
        holder
    }

    /// Users are identified by UUID; the holder name is its string form.
    pub fn create_user(self: &Arc<Self>, id: Uuid) -> Arc<PermissionHolder> {
        self.create_holder(HolderKind::User, &id.to_string())
    }

    pub fn create_group(self: &Arc<Self>, name: &str) -> Arc<PermissionHolder> {
        self.create_holder(HolderKind::Group, name)
    }

    /// The live holder for `reference`, if still loaded.
    pub fn get_loaded(&self, reference: &Reference) -> Option<Arc<PermissionHolder>> {
        self.holders.get(reference)?.upgrade()
    }

    pub fn get_loaded_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.get_loaded(&Reference::group(name))
    }

    pub fn get_loaded_user(&self, id: Uuid) -> Option<Arc<PermissionHolder>> {
        self.get_loaded(&Reference::user(&id.to_string()))
    }

    /// Forget a holder and drop its inheritance edges. Dependents keep
    /// their caches; a later mutation or re-load heals the graph.
    pub fn unload(&self, reference: &Reference) {
        self.holders.remove(reference);
        self.coordinator.clear(reference);
        tracing::debug!(holder = %reference, "holder unloaded");
    }

    /// Evict idle keyed-cache entries across every loaded holder, and drop
    /// registry entries whose holder has been dropped. Returns how many
    /// cache entries were evicted.
    pub fn prune_idle_caches(&self) -> usize {
        let max_idle = self.config.read().cache_idle_expiry();
        let mut evicted = 0;
        let mut dead: Vec<Reference> = Vec::new();

        for entry in self.holders.iter() {
            match entry.value().upgrade() {
                Some(holder) => evicted += holder.prune_idle_caches(max_idle),
                None => dead.push(entry.key().clone()),
            }
        }
        for reference in dead {
            self.holders.remove(&reference);
            self.coordinator.clear(&reference);
        }

        if evicted > 0 {
            tracing::debug!(evicted, "pruned idle resolution caches");
        }
        evicted
    }

    /// Drop every holder registration and the whole inheritance graph.
    pub fn shutdown(&self) {
        self.holders.clear();
        self.coordinator.reset();
    }
}
